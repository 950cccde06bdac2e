use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "seekdeep")]
#[command(about = "Deep-research engine (MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for MCP clients).
    McpStdio,
    /// Diagnose configuration (json; no secrets).
    Doctor,
    /// Print version info.
    Version,
}

fn has_env(keys: &[&str]) -> bool {
    keys.iter().any(|k| {
        std::env::var(k)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    })
}

mod mcp {
    use std::future::Future;
    use rmcp::{
        handler::server::router::tool::ToolRouter as RmcpToolRouter,
        handler::server::tool::Parameters,
        model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
        tool, tool_handler, tool_router,
        transport::stdio,
        ErrorData as McpError, ServiceExt,
    };
    use schemars::JsonSchema;
    use seekdeep_core::PageFetcher;
    use seekdeep_engine::orchestrator::{
        ResearchRequest, MAX_BREADTH, MAX_DEPTH, MIN_BREADTH, MIN_DEPTH,
    };
    use seekdeep_engine::{EngineConfig, HttpFetcher, LlmGateway, ResearchEngine, SearxngClient};
    use serde::Deserialize;
    use std::sync::Arc;

    const SCHEMA_VERSION: u64 = 1;

    const DEFAULT_DEPTH: u8 = 2;
    const DEFAULT_BREADTH: u8 = 3;

    #[derive(Clone, Copy, Debug)]
    enum ErrorCode {
        InvalidParams,
        NotConfigured,
        ResearchFailed,
    }

    impl ErrorCode {
        fn as_str(self) -> &'static str {
            match self {
                Self::InvalidParams => "invalid_params",
                Self::NotConfigured => "not_configured",
                Self::ResearchFailed => "research_failed",
            }
        }

        fn retryable(self) -> bool {
            match self {
                Self::ResearchFailed => true,
                // Configuration and invalid input are not retryable without
                // changing something.
                Self::InvalidParams | Self::NotConfigured => false,
            }
        }
    }

    fn error_obj(code: ErrorCode, message: impl ToString, hint: impl ToString) -> serde_json::Value {
        serde_json::json!({
            "code": code.as_str(),
            "message": message.to_string(),
            "hint": hint.to_string(),
            "retryable": code.retryable(),
        })
    }

    fn add_envelope_fields(payload: &mut serde_json::Value, elapsed_ms: u128) {
        payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
        payload["kind"] = serde_json::json!("deep_research");
        payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
    }

    /// Machine payload in structured_content, human-facing text in content[0].
    fn tool_result(payload: serde_json::Value, text: String) -> CallToolResult {
        let mut r = CallToolResult::structured(payload);
        r.content = Some(vec![Content::text(text)]);
        r
    }

    fn tool_error(payload: serde_json::Value) -> CallToolResult {
        let text = payload.to_string();
        tool_result(payload, text)
    }

    #[derive(Debug, Deserialize, JsonSchema, Default)]
    struct DeepResearchArgs {
        /// Research topic or question.
        #[serde(default)]
        query: String,
        /// Recursion depth (1-5; default 2).
        #[serde(default)]
        depth: Option<u8>,
        /// Search queries per level (1-5; default 3).
        #[serde(default)]
        breadth: Option<u8>,
        /// Model id of the form `provider:model` (anthropic, openai, google, xai).
        #[serde(default)]
        model: Option<String>,
        /// Soft cap on research-phase model tokens (> 0).
        #[serde(default)]
        token_budget: Option<u64>,
        /// Natural-language source preferences (e.g. "peer-reviewed only").
        #[serde(default)]
        source_preferences: Option<String>,
    }

    #[derive(Clone)]
    pub(crate) struct SeekdeepMcp {
        tool_router: RmcpToolRouter<Self>,
        config: EngineConfig,
        gateway: LlmGateway,
        http: reqwest::Client,
    }

    #[tool_router]
    impl SeekdeepMcp {
        pub(crate) fn new() -> Result<Self, McpError> {
            let config = EngineConfig::from_env();
            let http = reqwest::Client::builder()
                .user_agent(concat!("seekdeep/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| McpError::internal_error(e.to_string(), None))?;
            let gateway = LlmGateway::from_env(http.clone(), config.default_model.clone());
            Ok(Self {
                tool_router: Self::tool_router(),
                config,
                gateway,
                http,
            })
        }

        #[tool(
            description = "Deep research: recursively search the web, fetch and evaluate sources, and synthesize a markdown report with reliability-scored sources"
        )]
        async fn deep_research(
            &self,
            params: Parameters<Option<DeepResearchArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let args = params.0.unwrap_or_default();
            let t0 = std::time::Instant::now();

            let query = args.query.trim().to_string();
            if query.is_empty() {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "query": args.query,
                    "error": error_obj(
                        ErrorCode::InvalidParams,
                        "query must be a non-empty string",
                        "Pass the research topic as `query`."
                    ),
                });
                add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                return Ok(tool_error(payload));
            }

            let depth = args.depth.unwrap_or(DEFAULT_DEPTH);
            let breadth = args.breadth.unwrap_or(DEFAULT_BREADTH);
            if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth)
                || !(MIN_BREADTH..=MAX_BREADTH).contains(&breadth)
            {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "query": query,
                    "error": error_obj(
                        ErrorCode::InvalidParams,
                        format!("depth and breadth must be in [{MIN_DEPTH}, {MAX_DEPTH}]"),
                        "Pass depth and breadth between 1 and 5."
                    ),
                });
                add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                return Ok(tool_error(payload));
            }
            if args.token_budget == Some(0) {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "query": query,
                    "error": error_obj(
                        ErrorCode::InvalidParams,
                        "token_budget must be > 0",
                        "Omit token_budget for unbounded research."
                    ),
                });
                add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                return Ok(tool_error(payload));
            }

            // Invocation-setup errors are the only fatal ones: verify the
            // model credential and the search backend before any research.
            if let Err(e) = self.gateway.preflight(args.model.as_deref()) {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "query": query,
                    "error": error_obj(
                        ErrorCode::NotConfigured,
                        e.to_string(),
                        "Set the provider's API key (e.g. SEEKDEEP_ANTHROPIC_API_KEY) or pick a configured provider via `model`."
                    ),
                });
                add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                return Ok(tool_error(payload));
            }
            let search = match SearxngClient::new(
                self.http.clone(),
                self.config.searxng_endpoint.clone().unwrap_or_default(),
                self.config.searxng_engines.clone(),
                self.config.searxng_categories.clone(),
            ) {
                Ok(search) => search,
                Err(e) => {
                    let mut payload = serde_json::json!({
                        "ok": false,
                        "query": query,
                        "error": error_obj(
                            ErrorCode::NotConfigured,
                            e.to_string(),
                            "Set SEEKDEEP_SEARXNG_ENDPOINT to a SearxNG instance."
                        ),
                    });
                    add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                    return Ok(tool_error(payload));
                }
            };
            let fetcher: Arc<dyn PageFetcher> = match HttpFetcher::new() {
                Ok(fetcher) => Arc::new(fetcher),
                Err(e) => {
                    let mut payload = serde_json::json!({
                        "ok": false,
                        "query": query,
                        "error": error_obj(ErrorCode::NotConfigured, e.to_string(), ""),
                    });
                    add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                    return Ok(tool_error(payload));
                }
            };

            let engine = ResearchEngine::new(
                Arc::new(self.gateway.clone()),
                Arc::new(search),
                fetcher,
                self.config.concurrency,
            );
            let request = ResearchRequest {
                topic: query.clone(),
                breadth,
                depth,
                model: args.model.clone(),
                token_budget: args.token_budget,
                source_preferences: args.source_preferences.clone(),
            };

            match engine.run_detailed(&request).await {
                Ok((result, markdown)) => {
                    let mut payload = serde_json::json!({
                        "ok": true,
                        "query": query,
                        "depth": depth,
                        "breadth": breadth,
                        "report": markdown,
                        "learnings": result.learnings.len(),
                        "sources": result.sources.len(),
                        "visited_urls": result.visited_urls.len(),
                        "budget": {
                            "cap": result.budget.cap,
                            "used_tokens": result.budget.used_tokens,
                            "reached": result.budget.reached,
                        },
                    });
                    add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                    Ok(tool_result(payload, markdown))
                }
                Err(e) => {
                    let mut payload = serde_json::json!({
                        "ok": false,
                        "query": query,
                        "error": error_obj(
                            ErrorCode::ResearchFailed,
                            e.to_string(),
                            "Check the SearxNG endpoint and provider credentials, then retry."
                        ),
                    });
                    add_envelope_fields(&mut payload, t0.elapsed().as_millis());
                    Ok(tool_error(payload))
                }
            }
        }
    }

    #[tool_handler]
    impl rmcp::ServerHandler for SeekdeepMcp {
        fn get_info(&self) -> ServerInfo {
            ServerInfo {
                instructions: Some(
                    "Deep-research engine: one deep_research tool that searches, fetches, and \
                     evaluates web sources recursively, then returns a markdown report with \
                     reliability-scored sources."
                        .to_string(),
                ),
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                ..Default::default()
            }
        }
    }

    pub(crate) async fn serve_stdio() -> Result<(), McpError> {
        let svc = SeekdeepMcp::new()?;
        let running = svc
            .serve(stdio())
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        // Keep the stdio server alive until the client closes.
        running
            .waiting()
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("seekdeep=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::McpStdio => {
            mcp::serve_stdio()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Doctor => {
            let config = seekdeep_engine::EngineConfig::from_env();
            let doctor = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "searxng_configured": config.searxng_endpoint.is_some(),
                "concurrency": config.concurrency,
                "default_model": config.default_model,
                "providers": {
                    "anthropic": has_env(&["SEEKDEEP_ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"]),
                    "openai": has_env(&["SEEKDEEP_OPENAI_API_KEY", "OPENAI_API_KEY"]),
                    "google": has_env(&["SEEKDEEP_GOOGLE_API_KEY", "GEMINI_API_KEY"]),
                    "xai": has_env(&["SEEKDEEP_XAI_API_KEY", "XAI_API_KEY"]),
                },
            });
            println!("{}", serde_json::to_string_pretty(&doctor)?);
        }
        Commands::Version => {
            println!("seekdeep {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
