use seekdeep_core::{Error, Result, SearchBackend, SearchHit, SearchOptions};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Default per-query result cap.
pub const DEFAULT_RESULT_LIMIT: usize = 5;
/// Verification queries corroborate a shaky learning; give them more room.
pub const VERIFICATION_RESULT_LIMIT: usize = 8;

#[derive(Debug, Clone)]
pub struct SearxngClient {
    client: reqwest::Client,
    endpoint: String,
    engines: Option<String>,
    categories: Option<String>,
}

impl SearxngClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: String,
        engines: Option<String>,
        categories: Option<String>,
    ) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(Error::NotConfigured(
                "missing SEEKDEEP_SEARXNG_ENDPOINT".to_string(),
            ));
        }
        Ok(Self {
            client,
            endpoint,
            engines,
            categories,
        })
    }

    fn endpoint_search(&self) -> String {
        // Accept either a base URL (.../) or a full /search endpoint.
        let mut base = self.endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchBackend for SearxngClient {
    async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let mut req = self
            .client
            .get(self.endpoint_search())
            .query(&[("q", query), ("format", "json")]);
        if let Some(engines) = self.engines.as_deref() {
            req = req.query(&[("engines", engines)]);
        }
        if let Some(categories) = self.categories.as_deref() {
            req = req.query(&[("categories", categories)]);
        }

        let resp = req
            .timeout(opts.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("searxng search: {e}"))
                } else {
                    Error::Search(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("searxng search HTTP {status}")));
        }

        let parsed: SearxngSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        // Dedupe by url across engines, keep first appearance, cap to limit.
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for r in parsed.results.unwrap_or_default() {
            if out.len() >= opts.limit {
                break;
            }
            let Some(raw_url) = r.url else { continue };
            let url = raw_url.trim().to_string();
            if url.is_empty() || url::Url::parse(&url).is_err() {
                continue;
            }
            if !seen.insert(url.clone()) {
                continue;
            }
            out.push(SearchHit {
                url,
                title: r.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
                description: r
                    .content
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty()),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use std::net::SocketAddr;
    use std::time::Duration;

    fn opts(limit: usize) -> SearchOptions {
        SearchOptions {
            timeout: Duration::from_secs(5),
            limit,
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn parses_minimal_searxng_shape() {
        let js = r#"
        {
          "results": [
            {"url":"https://example.com","title":"Example","content":"Hello"}
          ]
        }
        "#;
        let parsed: SearxngSearchResponse = serde_json::from_str(js).unwrap();
        assert_eq!(parsed.results.unwrap().len(), 1);
    }

    #[test]
    fn endpoint_accepts_base_or_full_search_url() {
        let client = reqwest::Client::new();
        let a = SearxngClient::new(client.clone(), "http://sx:8888/".into(), None, None).unwrap();
        assert_eq!(a.endpoint_search(), "http://sx:8888/search");
        let b = SearxngClient::new(client, "http://sx:8888/search".into(), None, None).unwrap();
        assert_eq!(b.endpoint_search(), "http://sx:8888/search");
    }

    #[test]
    fn empty_endpoint_is_not_configured() {
        let err = SearxngClient::new(reqwest::Client::new(), "  ".into(), None, None).unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[tokio::test]
    async fn dedupes_across_engines_and_caps_to_limit() {
        let app = Router::new().route(
            "/search",
            get(|| async {
                Json(serde_json::json!({
                    "results": [
                        {"url": "https://a.example/x", "title": "A", "content": "first"},
                        {"url": "https://a.example/x", "title": "A dup", "content": "dup"},
                        {"url": "not a url", "title": "junk"},
                        {"url": "https://b.example/y", "title": "B"},
                        {"url": "https://c.example/z", "title": "C"},
                    ]
                }))
            }),
        );
        let addr = serve(app).await;

        let client =
            SearxngClient::new(reqwest::Client::new(), format!("http://{addr}"), None, None)
                .unwrap();
        let hits = client.search("anything", &opts(2)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.example/x");
        assert_eq!(hits[0].description.as_deref(), Some("first"));
        assert_eq!(hits[1].url, "https://b.example/y");
    }

    #[tokio::test]
    async fn non_success_status_is_a_search_error() {
        let app = Router::new().route(
            "/search",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "nope") }),
        );
        let addr = serve(app).await;

        let client =
            SearxngClient::new(reqwest::Client::new(), format!("http://{addr}"), None, None)
                .unwrap();
        let err = client.search("anything", &opts(5)).await.unwrap_err();
        assert!(matches!(err, Error::Search(_)), "got {err:?}");
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn forwards_engines_and_categories_params() {
        let app = Router::new().route(
            "/search",
            get(
                |axum::extract::Query(q): axum::extract::Query<
                    std::collections::HashMap<String, String>,
                >| async move {
                    assert_eq!(q.get("format").map(String::as_str), Some("json"));
                    assert_eq!(q.get("engines").map(String::as_str), Some("ddg,brave"));
                    assert_eq!(q.get("categories").map(String::as_str), Some("general"));
                    Json(serde_json::json!({ "results": [] }))
                },
            ),
        );
        let addr = serve(app).await;

        let client = SearxngClient::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            Some("ddg,brave".to_string()),
            Some("general".to_string()),
        )
        .unwrap();
        let hits = client.search("q", &opts(5)).await.unwrap();
        assert!(hits.is_empty());
    }
}
