//! Provider-polymorphic structured-output gateway.
//!
//! The only place provider differences live. A `provider:model` id selects
//! one of a closed set of backends; each arm owns its credential lookup and
//! request shaping. All arms funnel into the same JSON-extract + schema
//! validation path, so callers see one behavior.

use crate::config::env_trimmed_fallback;
use seekdeep_core::{
    schema::Schema, Error, ModelGateway, Result, StructuredReply, StructuredRequest, TokenUsage,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Outer bound on a single model call; the extractor applies its own
/// tighter wall-clock deadline on top.
const MODEL_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_MAX_TOKENS: u64 = 8_192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    Xai,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Xai => "xai",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "google" => Ok(Self::Google),
            "xai" => Ok(Self::Xai),
            other => Err(Error::NotConfigured(format!(
                "unknown model provider `{other}` (expected anthropic|openai|google|xai)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRef {
    pub provider: Provider,
    pub model: String,
}

impl ModelRef {
    pub fn parse(s: &str) -> Result<Self> {
        let (provider, model) = s.split_once(':').ok_or_else(|| {
            Error::NotConfigured(format!("malformed model id `{s}` (expected provider:model)"))
        })?;
        let model = model.trim();
        if model.is_empty() {
            return Err(Error::NotConfigured(format!(
                "malformed model id `{s}` (empty model name)"
            )));
        }
        Ok(Self {
            provider: Provider::parse(provider.trim())?,
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct ProviderKeys {
    anthropic: Option<String>,
    openai: Option<String>,
    google: Option<String>,
    xai: Option<String>,
}

impl ProviderKeys {
    fn from_env() -> Self {
        Self {
            anthropic: env_trimmed_fallback("SEEKDEEP_ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"),
            openai: env_trimmed_fallback("SEEKDEEP_OPENAI_API_KEY", "OPENAI_API_KEY"),
            google: env_trimmed_fallback("SEEKDEEP_GOOGLE_API_KEY", "GEMINI_API_KEY"),
            xai: env_trimmed_fallback("SEEKDEEP_XAI_API_KEY", "XAI_API_KEY"),
        }
    }
}

#[derive(Debug, Clone)]
struct ProviderEndpoints {
    anthropic: String,
    openai: String,
    google: String,
    xai: String,
}

impl ProviderEndpoints {
    // Overrides are for testing/debugging only (do not include secrets).
    fn from_env() -> Self {
        fn pick(key: &str, default: &str) -> String {
            crate::config::env_trimmed(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        }
        Self {
            anthropic: pick("SEEKDEEP_ANTHROPIC_ENDPOINT", "https://api.anthropic.com"),
            openai: pick("SEEKDEEP_OPENAI_ENDPOINT", "https://api.openai.com"),
            google: pick(
                "SEEKDEEP_GOOGLE_ENDPOINT",
                "https://generativelanguage.googleapis.com",
            ),
            xai: pick("SEEKDEEP_XAI_ENDPOINT", "https://api.x.ai"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmGateway {
    client: reqwest::Client,
    default_model: String,
    keys: ProviderKeys,
    endpoints: ProviderEndpoints,
}

impl LlmGateway {
    pub fn from_env(client: reqwest::Client, default_model: String) -> Self {
        Self {
            client,
            default_model,
            keys: ProviderKeys::from_env(),
            endpoints: ProviderEndpoints::from_env(),
        }
    }

    /// Resolve a model id and verify its credential is present, before any
    /// network call. Invocation setup uses this to fail fast.
    pub fn preflight(&self, model: Option<&str>) -> Result<ModelRef> {
        let model_ref = ModelRef::parse(model.unwrap_or(&self.default_model))?;
        self.credential(model_ref.provider)?;
        Ok(model_ref)
    }

    fn credential(&self, provider: Provider) -> Result<&str> {
        let key = match provider {
            Provider::Anthropic => &self.keys.anthropic,
            Provider::OpenAi => &self.keys.openai,
            Provider::Google => &self.keys.google,
            Provider::Xai => &self.keys.xai,
        };
        key.as_deref().ok_or_else(|| {
            Error::NotConfigured(format!(
                "missing credential for provider `{}`",
                provider.as_str()
            ))
        })
    }

    fn structured_system(system: &str, schema: &Schema) -> String {
        format!(
            "{system}\n\nRespond with a single JSON object that conforms to this JSON Schema. \
             Output only the JSON object, with no surrounding prose and no code fences.\n\n{}",
            schema.to_value()
        )
    }

    async fn anthropic_call(
        &self,
        key: &str,
        model: &str,
        system: &str,
        prompt: &str,
        max_tokens: u64,
    ) -> Result<(String, TokenUsage)> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            content: Vec<ContentBlock>,
            #[serde(default)]
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            input_tokens: u64,
            #[serde(default)]
            output_tokens: u64,
        }

        let body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.endpoints.anthropic))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .timeout(MODEL_TIMEOUT)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Model(format!("anthropic messages HTTP {status}")));
        }
        let parsed: Reply = resp.json().await.map_err(|e| Error::Model(e.to_string()))?;
        let text: String = parsed.content.into_iter().filter_map(|c| c.text).collect();
        let usage = parsed
            .usage
            .map(|u| TokenUsage::from_split(u.input_tokens, u.output_tokens))
            .unwrap_or_default();
        Ok((text, usage))
    }

    /// OpenAI-compatible chat completions; also serves the xAI arm.
    #[allow(clippy::too_many_arguments)]
    async fn chat_completions_call(
        &self,
        label: &'static str,
        endpoint: &str,
        key: &str,
        model: &str,
        system: &str,
        prompt: &str,
        max_tokens: u64,
    ) -> Result<(String, TokenUsage)> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            #[serde(default)]
            content: String,
        }
        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            prompt_tokens: u64,
            #[serde(default)]
            completion_tokens: u64,
            #[serde(default)]
            total_tokens: u64,
        }

        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": max_tokens,
            "response_format": { "type": "json_object" },
        });
        let resp = self
            .client
            .post(format!("{endpoint}/v1/chat/completions"))
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(&body)
            .timeout(MODEL_TIMEOUT)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Model(format!(
                "{label} chat.completions HTTP {status}"
            )));
        }
        let parsed: Reply = resp.json().await.map_err(|e| Error::Model(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let usage = parsed
            .usage
            .map(|u| {
                if u.total_tokens > 0 {
                    TokenUsage {
                        total: u.total_tokens,
                    }
                } else {
                    TokenUsage::from_split(u.prompt_tokens, u.completion_tokens)
                }
            })
            .unwrap_or_default();
        Ok((text, usage))
    }

    async fn google_call(
        &self,
        key: &str,
        model: &str,
        system: &str,
        prompt: &str,
        max_tokens: u64,
    ) -> Result<(String, TokenUsage)> {
        #[derive(Deserialize)]
        struct Reply {
            #[serde(default)]
            candidates: Vec<Candidate>,
            #[serde(default, rename = "usageMetadata")]
            usage_metadata: Option<UsageMetadata>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            #[serde(default)]
            content: Option<CandidateContent>,
        }
        #[derive(Deserialize)]
        struct CandidateContent {
            #[serde(default)]
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            #[serde(default)]
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct UsageMetadata {
            #[serde(default, rename = "promptTokenCount")]
            prompt_token_count: u64,
            #[serde(default, rename = "candidatesTokenCount")]
            candidates_token_count: u64,
            #[serde(default, rename = "totalTokenCount")]
            total_token_count: u64,
        }

        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "maxOutputTokens": max_tokens,
            },
        });
        let resp = self
            .client
            .post(format!(
                "{}/v1beta/models/{model}:generateContent",
                self.endpoints.google
            ))
            .header("x-goog-api-key", key)
            .json(&body)
            .timeout(MODEL_TIMEOUT)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Model(format!("google generateContent HTTP {status}")));
        }
        let parsed: Reply = resp.json().await.map_err(|e| Error::Model(e.to_string()))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        let usage = parsed
            .usage_metadata
            .map(|u| {
                if u.total_token_count > 0 {
                    TokenUsage {
                        total: u.total_token_count,
                    }
                } else {
                    TokenUsage::from_split(u.prompt_token_count, u.candidates_token_count)
                }
            })
            .unwrap_or_default();
        Ok((text, usage))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("model call: {e}"))
    } else {
        Error::Model(e.to_string())
    }
}

/// Pull the first JSON object out of a model reply. Models occasionally
/// wrap the object in prose or code fences despite instructions.
fn parse_json_object(text: &str) -> Result<serde_json::Value> {
    let start = text
        .find('{')
        .ok_or_else(|| Error::Model("model returned no JSON object".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| Error::Model("model returned an unterminated JSON object".to_string()))?;
    serde_json::from_str(&text[start..=end])
        .map_err(|e| Error::Model(format!("model returned invalid JSON: {e}")))
}

#[async_trait::async_trait]
impl ModelGateway for LlmGateway {
    async fn generate_structured(&self, req: &StructuredRequest) -> Result<StructuredReply> {
        let model_ref = ModelRef::parse(req.model.as_deref().unwrap_or(&self.default_model))?;
        let key = self.credential(model_ref.provider)?.to_string();
        let system = Self::structured_system(&req.system, &req.schema);
        let max_tokens = req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let (text, usage) = match model_ref.provider {
            Provider::Anthropic => {
                self.anthropic_call(&key, &model_ref.model, &system, &req.prompt, max_tokens)
                    .await?
            }
            Provider::OpenAi => {
                let endpoint = self.endpoints.openai.clone();
                self.chat_completions_call(
                    "openai",
                    &endpoint,
                    &key,
                    &model_ref.model,
                    &system,
                    &req.prompt,
                    max_tokens,
                )
                .await?
            }
            Provider::Xai => {
                let endpoint = self.endpoints.xai.clone();
                self.chat_completions_call(
                    "xai",
                    &endpoint,
                    &key,
                    &model_ref.model,
                    &system,
                    &req.prompt,
                    max_tokens,
                )
                .await?
            }
            Provider::Google => {
                self.google_call(&key, &model_ref.model, &system, &req.prompt, max_tokens)
                    .await?
            }
        };

        let value = parse_json_object(&text)?;
        req.schema.validate(&value)?;
        Ok(StructuredReply { value, usage })
    }
}
