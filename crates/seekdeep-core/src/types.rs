use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Clamp a model-reported score into `[0,1]`; non-finite values fall to 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Registrable host of a url, or the raw string when it does not parse.
pub fn domain_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => u.host_str().unwrap_or(url).to_string(),
        Err(_) => url.to_string(),
    }
}

/// One engine-facing search query produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpQuery {
    pub query: String,
    /// What this query is trying to establish; carried into child topics.
    pub research_goal: String,
    /// Minimum reliability a fetched source must meet to feed extraction.
    pub reliability_threshold: f64,
    /// Verification queries corroborate a prior low-reliability learning
    /// and are fetched with a larger result limit.
    pub is_verification: bool,
    pub related_direction: Option<String>,
}

impl SerpQuery {
    pub fn new(
        query: String,
        research_goal: String,
        reliability_threshold: f64,
        is_verification: bool,
        related_direction: Option<String>,
    ) -> Self {
        Self {
            query,
            research_goal,
            reliability_threshold: clamp_unit(reliability_threshold),
            is_verification,
            related_direction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: Option<String>,
    pub markdown: String,
}

/// Per-source verdict from the reliability evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEvaluation {
    pub score: f64,
    pub reasoning: String,
    pub use_source: bool,
    pub preference_reason: Option<String>,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub url: String,
    pub title: Option<String>,
    pub domain: String,
    pub reliability_score: f64,
    pub reliability_reasoning: String,
}

/// An extracted fact paired with the confidence the extractor assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedLearning {
    pub content: String,
    pub reliability: f64,
}

/// A prioritized follow-up question promoted across a depth boundary.
///
/// `priority` is whatever the model returned; downstream consumers use
/// only descending order, so it is deliberately not clamped to 1-5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchDirection {
    pub question: String,
    pub priority: i64,
    pub parent_goal: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BudgetState {
    pub cap: Option<u64>,
    pub used_tokens: u64,
    pub reached: bool,
}

/// Accumulated output of one research subtree.
#[derive(Debug, Clone, Default)]
pub struct ResearchResult {
    /// Appearance-ordered; deduplicated by exact trimmed content.
    pub learnings: Vec<WeightedLearning>,
    /// One record per url.
    pub sources: Vec<SourceMetadata>,
    /// Union of urls the fetcher returned non-null pages for.
    pub visited_urls: BTreeSet<String>,
    pub budget: BudgetState,
}

impl ResearchResult {
    /// Merge learnings in, keeping appearance order. Duplicate trimmed
    /// contents keep the maximum reliability seen on either side.
    pub fn merge_learnings(&mut self, add: impl IntoIterator<Item = WeightedLearning>) {
        for learning in add {
            let content = learning.content.trim();
            if content.is_empty() {
                continue;
            }
            let reliability = clamp_unit(learning.reliability);
            match self.learnings.iter_mut().find(|l| l.content == content) {
                Some(existing) => {
                    if reliability > existing.reliability {
                        existing.reliability = reliability;
                    }
                }
                None => self.learnings.push(WeightedLearning {
                    content: content.to_string(),
                    reliability,
                }),
            }
        }
    }

    /// Merge source metadata in, keyed by url. On a duplicate url the
    /// record with the higher reliability score wins wholesale.
    pub fn merge_sources(&mut self, add: impl IntoIterator<Item = SourceMetadata>) {
        for source in add {
            match self.sources.iter_mut().find(|s| s.url == source.url) {
                Some(existing) => {
                    if source.reliability_score > existing.reliability_score {
                        *existing = source;
                    }
                }
                None => self.sources.push(source),
            }
        }
    }

    pub fn merge_visited(&mut self, add: impl IntoIterator<Item = String>) {
        self.visited_urls.extend(add);
    }

    /// Fold another subtree's accumulators into this one.
    pub fn absorb(&mut self, other: ResearchResult) {
        self.merge_learnings(other.learnings);
        self.merge_sources(other.sources);
        self.merge_visited(other.visited_urls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn learning(content: &str, reliability: f64) -> WeightedLearning {
        WeightedLearning {
            content: content.to_string(),
            reliability,
        }
    }

    fn source(url: &str, score: f64) -> SourceMetadata {
        SourceMetadata {
            url: url.to_string(),
            title: None,
            domain: domain_of(url),
            reliability_score: score,
            reliability_reasoning: "r".to_string(),
        }
    }

    #[test]
    fn serp_query_clamps_threshold() {
        let q = SerpQuery::new("q".into(), "g".into(), 1.7, false, None);
        assert_eq!(q.reliability_threshold, 1.0);
        let q = SerpQuery::new("q".into(), "g".into(), -0.2, false, None);
        assert_eq!(q.reliability_threshold, 0.0);
        let q = SerpQuery::new("q".into(), "g".into(), f64::NAN, false, None);
        assert_eq!(q.reliability_threshold, 0.0);
    }

    #[test]
    fn learning_merge_keeps_max_reliability_for_same_content() {
        let mut r = ResearchResult::default();
        r.merge_learnings([learning("MQTT is a pub/sub protocol.", 0.4)]);
        r.merge_learnings([learning("  MQTT is a pub/sub protocol.  ", 0.9)]);
        r.merge_learnings([learning("MQTT is a pub/sub protocol.", 0.2)]);
        assert_eq!(r.learnings.len(), 1);
        assert_eq!(r.learnings[0].reliability, 0.9);
    }

    #[test]
    fn learning_merge_drops_empty_and_preserves_appearance_order() {
        let mut r = ResearchResult::default();
        r.merge_learnings([learning("a", 0.1), learning("   ", 0.9), learning("b", 0.2)]);
        r.merge_learnings([learning("c", 0.3), learning("a", 0.05)]);
        let contents: Vec<&str> = r.learnings.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn source_merge_keeps_record_with_max_score() {
        let mut r = ResearchResult::default();
        r.merge_sources([source("https://example.com/a", 0.5)]);
        let mut better = source("https://example.com/a", 0.8);
        better.title = Some("better".to_string());
        r.merge_sources([better]);
        r.merge_sources([source("https://example.com/a", 0.1)]);
        assert_eq!(r.sources.len(), 1);
        assert_eq!(r.sources[0].reliability_score, 0.8);
        assert_eq!(r.sources[0].title.as_deref(), Some("better"));
    }

    #[test]
    fn visited_urls_are_a_set_union() {
        let mut r = ResearchResult::default();
        r.merge_visited(["https://a".to_string(), "https://b".to_string()]);
        r.merge_visited(["https://b".to_string(), "https://c".to_string()]);
        assert_eq!(r.visited_urls.len(), 3);
    }

    fn arb_learnings() -> impl Strategy<Value = Vec<WeightedLearning>> {
        prop::collection::vec(
            ("[a-d]{1,3}", 0.0f64..=1.0).prop_map(|(content, reliability)| WeightedLearning {
                content,
                reliability,
            }),
            0..12,
        )
    }

    fn arb_sources() -> impl Strategy<Value = Vec<SourceMetadata>> {
        prop::collection::vec(
            ("[a-d]{1,3}", 0.0f64..=1.0).prop_map(|(url, score)| SourceMetadata {
                url,
                title: None,
                domain: String::new(),
                reliability_score: score,
                reliability_reasoning: String::new(),
            }),
            0..12,
        )
    }

    fn canonical(r: &ResearchResult) -> Vec<(String, u64)> {
        let mut v: Vec<(String, u64)> = r
            .learnings
            .iter()
            .map(|l| (l.content.clone(), (l.reliability * 1e9) as u64))
            .chain(
                r.sources
                    .iter()
                    .map(|s| (s.url.clone(), (s.reliability_score * 1e9) as u64)),
            )
            .collect();
        v.sort();
        v
    }

    proptest! {
        // merge(merge(A,B),C) == merge(A,merge(B,C)) up to ordering.
        #[test]
        fn merge_is_associative(
            a in arb_learnings(), b in arb_learnings(), c in arb_learnings(),
            sa in arb_sources(), sb in arb_sources(), sc in arb_sources(),
        ) {
            let mk = |ls: &[WeightedLearning], ss: &[SourceMetadata]| {
                let mut r = ResearchResult::default();
                r.merge_learnings(ls.to_vec());
                r.merge_sources(ss.to_vec());
                r
            };

            let mut left = mk(&a, &sa);
            left.absorb(mk(&b, &sb));
            left.absorb(mk(&c, &sc));

            let mut right_inner = mk(&b, &sb);
            right_inner.absorb(mk(&c, &sc));
            let mut right = mk(&a, &sa);
            right.absorb(right_inner);

            prop_assert_eq!(canonical(&left), canonical(&right));
        }

        #[test]
        fn merged_reliability_is_always_unit_interval(a in arb_learnings(), b in arb_learnings()) {
            let mut r = ResearchResult::default();
            r.merge_learnings(a);
            r.merge_learnings(b);
            for l in &r.learnings {
                prop_assert!((0.0..=1.0).contains(&l.reliability));
            }
            let mut seen = std::collections::BTreeSet::new();
            for l in &r.learnings {
                prop_assert!(seen.insert(l.content.clone()), "duplicate content after merge");
            }
        }
    }
}
