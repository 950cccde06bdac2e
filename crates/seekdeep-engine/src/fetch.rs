use crate::governor::Governor;
use crate::markdown::html_to_markdown;
use seekdeep_core::{Error, FetchedPage, PageFetcher, Result};
use std::sync::Arc;
use std::time::Duration;

/// Whole-fetch deadline: network plus conversion.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("seekdeep/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            // Avoid "hang forever" on DNS/TLS/body stalls.
            .connect_timeout(Duration::from_secs(10))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_markdown(&self, url: &str) -> Option<FetchedPage> {
        let parsed = match url::Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                tracing::debug!(url, error = %e, "skipping unparseable url");
                return None;
            }
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return None;
        }

        let resp = match self.client.get(parsed).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url, error = %e, "fetch failed");
                return None;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            tracing::debug!(url, %status, "fetch returned non-success status");
            return None;
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            tracing::debug!(url, content_type, "skipping non-html content type");
            return None;
        }

        let body = resp.text().await.ok()?;
        let (title, markdown) = html_to_markdown(&body);
        if markdown.trim().is_empty() {
            tracing::debug!(url, "page produced empty markdown");
            return None;
        }
        Some(FetchedPage {
            url: url.to_string(),
            title,
            markdown,
        })
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Option<FetchedPage> {
        self.fetch_markdown(url).await
    }
}

/// Fetch all urls concurrently through the governor, dropping failures.
pub async fn batch_fetch(
    fetcher: &Arc<dyn PageFetcher>,
    governor: &Governor,
    urls: &[String],
) -> Vec<FetchedPage> {
    let tasks = urls
        .iter()
        .map(|url| governor.run(fetcher.fetch(url)))
        .collect::<Vec<_>>();
    futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .flatten()
        .collect()
}
