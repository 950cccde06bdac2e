use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod schema;
pub mod trim;
pub mod types;

pub use types::*;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("model call failed: {0}")]
    Model(String),
    #[error("schema violation: {0}")]
    Schema(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Total model tokens consumed by one gateway call.
///
/// Providers report either a single total or split input/output counts;
/// both collapse into `total` here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: u64,
}

impl TokenUsage {
    pub fn from_split(input: u64, output: u64) -> Self {
        Self {
            total: input.saturating_add(output),
        }
    }
}

/// One structured-output request to a chat model.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// `provider:model` identifier; `None` uses the gateway's default.
    pub model: Option<String>,
    pub system: String,
    pub prompt: String,
    pub schema: schema::Schema,
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StructuredReply {
    /// Parsed model output, already validated against the request schema.
    pub value: serde_json::Value,
    pub usage: TokenUsage,
}

/// Abstract structured-output generator over a chat model.
///
/// The gateway validates the model's output against the request schema and
/// fails the call with `Error::Schema` when parsing or validation fails.
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate_structured(&self, req: &StructuredRequest) -> Result<StructuredReply>;
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub timeout: Duration,
    pub limit: usize,
}

#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>>;
}

/// Retrieves a url and returns cleaned markdown, or nothing.
///
/// Failures (network, non-OK status, wrong content type, empty content,
/// parse error) are data points, not exceptions: they all map to `None`.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<FetchedPage>;
}
