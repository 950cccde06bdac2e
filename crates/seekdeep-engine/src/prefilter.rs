//! Per-result LLM gate that drops obvious junk before fetching.

use crate::budget::BudgetMeter;
use crate::governor::Governor;
use seekdeep_core::{
    schema::{self, Field, Schema},
    types::domain_of,
    ModelGateway, Result, SearchHit, SerpQuery, StructuredRequest,
};

fn verdict_schema() -> Schema {
    Schema::object(vec![
        Field::required(
            "shouldScrape",
            "true unless the result is obvious junk",
            Schema::Boolean,
        ),
        Field::required("reasoning", "one short sentence", Schema::String),
    ])
}

const SYSTEM: &str = "You pre-filter search results for a research pipeline. \
Decide whether a result is worth fetching. Drop ONLY obvious junk: SEO spam, \
clickbait listicles, ad aggregators, pages clearly irrelevant to the query, or \
pages that violate the user's source preferences. When unsure, let it through.";

fn hit_prompt(serp: &SerpQuery, hit: &SearchHit, preferences: Option<&str>) -> String {
    let mut prompt = format!(
        "Search query: {}\nResearch goal: {}\n\nCandidate result:\n- url: {}\n- domain: {}\n",
        serp.query,
        serp.research_goal,
        hit.url,
        domain_of(&hit.url),
    );
    if let Some(title) = hit.title.as_deref() {
        prompt.push_str(&format!("- title: {title}\n"));
    }
    if let Some(description) = hit.description.as_deref() {
        prompt.push_str(&format!("- description: {description}\n"));
    }
    if let Some(prefs) = preferences {
        prompt.push_str(&format!("\nUser source preferences:\n{prefs}\n"));
    }
    prompt
}

/// Gate each hit with one concurrent gateway call; returns the hits that
/// should be scraped, preserving input order.
pub async fn filter_hits(
    gateway: &dyn ModelGateway,
    governor: &Governor,
    meter: &BudgetMeter,
    model: Option<&str>,
    serp: &SerpQuery,
    hits: &[SearchHit],
    preferences: Option<&str>,
) -> Result<Vec<SearchHit>> {
    let candidates: Vec<&SearchHit> = hits.iter().filter(|h| !h.url.trim().is_empty()).collect();

    let tasks = candidates.iter().map(|hit| async {
        let req = StructuredRequest {
            model: model.map(str::to_string),
            system: SYSTEM.to_string(),
            prompt: hit_prompt(serp, hit, preferences),
            schema: verdict_schema(),
            max_tokens: Some(512),
        };
        let reply = governor.run(gateway.generate_structured(&req)).await?;
        meter.record(reply.usage);
        schema::bool_field(&reply.value, "shouldScrape")
    });

    let verdicts = futures_util::future::join_all(tasks).await;
    let mut kept = Vec::new();
    for (hit, verdict) in candidates.into_iter().zip(verdicts) {
        if verdict? {
            kept.push(hit.clone());
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekdeep_core::{Error, StructuredReply, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGateway {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn generate_structured(
            &self,
            req: &StructuredRequest,
        ) -> seekdeep_core::Result<StructuredReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Drop anything from the spam domain, keep the rest.
            let verdict = !req.prompt.contains("spam.example");
            Ok(StructuredReply {
                value: serde_json::json!({ "shouldScrape": verdict, "reasoning": "test" }),
                usage: TokenUsage { total: 10 },
            })
        }
    }

    fn serp() -> SerpQuery {
        SerpQuery::new("rust async".into(), "understand async".into(), 0.3, false, None)
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: Some("t".to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn keeps_passing_hits_and_drops_junk() {
        let gateway = ScriptedGateway {
            calls: AtomicUsize::new(0),
        };
        let governor = Governor::new(2);
        let meter = BudgetMeter::new(None);
        let hits = vec![
            hit("https://docs.example/async"),
            hit("https://spam.example/10-best-things"),
            hit("https://blog.example/post"),
            hit("   "),
        ];
        let kept = filter_hits(&gateway, &governor, &meter, None, &serp(), &hits, None)
            .await
            .unwrap();
        let urls: Vec<&str> = kept.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["https://docs.example/async", "https://blog.example/post"]);
        // Empty url never reaches the model.
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
        assert_eq!(meter.snapshot().used_tokens, 30);
    }

    #[tokio::test]
    async fn preference_block_is_omitted_when_absent() {
        let prompt = hit_prompt(&serp(), &hit("https://a.example/x"), None);
        assert!(!prompt.contains("preferences"));
        let prompt = hit_prompt(&serp(), &hit("https://a.example/x"), Some("peer-reviewed only"));
        assert!(prompt.contains("peer-reviewed only"));
    }

    #[tokio::test]
    async fn gateway_failure_propagates() {
        struct FailingGateway;
        #[async_trait::async_trait]
        impl ModelGateway for FailingGateway {
            async fn generate_structured(
                &self,
                _req: &StructuredRequest,
            ) -> seekdeep_core::Result<StructuredReply> {
                Err(Error::Model("boom".to_string()))
            }
        }
        let governor = Governor::new(2);
        let meter = BudgetMeter::new(None);
        let hits = vec![hit("https://a.example/x")];
        let err = filter_hits(&FailingGateway, &governor, &meter, None, &serp(), &hits, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }
}
