//! Process-wide engine configuration.
//!
//! Read once at startup from the environment and passed explicitly into
//! constructors; nothing here is consulted after construction.

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_MODEL: &str = "anthropic:claude-sonnet-4-20250514";

pub(crate) fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn env_trimmed_fallback(key: &str, fallback: &str) -> Option<String> {
    env_trimmed(key).or_else(|| env_trimmed(fallback))
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SearxNG base url (or full `/search` endpoint). Required for live runs.
    pub searxng_endpoint: Option<String>,
    /// Optional comma-separated engine list forwarded to the backend.
    pub searxng_engines: Option<String>,
    /// Optional comma-separated category list forwarded to the backend.
    pub searxng_categories: Option<String>,
    /// Governor capacity: simultaneous in-flight model/search/fetch ops.
    pub concurrency: usize,
    /// Default `provider:model` used when a request does not name one.
    pub default_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            searxng_endpoint: None,
            searxng_engines: None,
            searxng_categories: None,
            concurrency: DEFAULT_CONCURRENCY,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let concurrency = env_trimmed("SEEKDEEP_CONCURRENCY")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY);
        Self {
            searxng_endpoint: env_trimmed("SEEKDEEP_SEARXNG_ENDPOINT"),
            searxng_engines: env_trimmed("SEEKDEEP_SEARXNG_ENGINES"),
            searxng_categories: env_trimmed("SEEKDEEP_SEARXNG_CATEGORIES"),
            concurrency,
            default_model: env_trimmed("SEEKDEEP_DEFAULT_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}
