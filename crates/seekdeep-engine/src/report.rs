//! Final report assembly.
//!
//! One gateway call over the accumulated learnings, then a reliability-
//! sorted Sources section. The report is the invocation's deliverable, so
//! this stage never fails and is never budget-gated: a gateway error
//! degrades to a plain listing of the learnings.

use crate::budget::BudgetMeter;
use crate::governor::Governor;
use seekdeep_core::{
    schema::{self, Field, Schema},
    trim::trim_to_tokens,
    ModelGateway, ResearchResult, SourceMetadata, StructuredRequest,
};

/// Budget for the `<learning>` block interpolated into the report prompt.
pub const REPORT_LEARNINGS_TOKENS: usize = 150_000;

fn report_schema() -> Schema {
    Schema::object(vec![Field::required(
        "reportMarkdown",
        "the full report, markdown",
        Schema::String,
    )])
}

const SYSTEM: &str = "You write final research reports. Write the report in \
markdown, as detailed as possible: aim for 3 or more pages and include ALL the \
learnings from the research. Organize with headings; state facts plainly and \
note where sources disagree.";

fn learnings_block(result: &ResearchResult) -> String {
    result
        .learnings
        .iter()
        .map(|l| {
            format!(
                "<learning reliability=\"{:.2}\">{}</learning>",
                l.reliability, l.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fallback_report(topic: &str, result: &ResearchResult) -> String {
    let mut out = format!("# Research Report\n\nTopic: {topic}\n\n## Findings\n");
    if result.learnings.is_empty() {
        out.push_str("\nNo learnings were gathered for this topic.\n");
    } else {
        for l in &result.learnings {
            out.push_str(&format!("\n- {} _(reliability {:.2})_", l.content, l.reliability));
        }
        out.push('\n');
    }
    out
}

fn sources_section(sources: &[SourceMetadata]) -> String {
    let mut sorted: Vec<&SourceMetadata> = sources.iter().collect();
    sorted.sort_by(|a, b| {
        b.reliability_score
            .partial_cmp(&a.reliability_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = String::from("## Sources\n");
    for s in sorted {
        out.push('\n');
        out.push_str(&format!("- {} — Reliability: {:.2}", s.url, s.reliability_score));
        if let Some(title) = s.title.as_deref() {
            out.push_str(&format!(" — {title}"));
        }
        if !s.reliability_reasoning.trim().is_empty() {
            out.push_str(&format!("\n  {}", s.reliability_reasoning.trim()));
        }
    }
    out
}

/// Render the final deliverable: report body plus Sources section.
pub async fn write_report(
    gateway: &dyn ModelGateway,
    governor: &Governor,
    meter: &BudgetMeter,
    model: Option<&str>,
    topic: &str,
    result: &ResearchResult,
) -> String {
    let block = learnings_block(result);
    let block = trim_to_tokens(&block, REPORT_LEARNINGS_TOKENS);
    let req = StructuredRequest {
        model: model.map(str::to_string),
        system: SYSTEM.to_string(),
        prompt: format!("Topic:\n{topic}\n\nLearnings from the research:\n{block}"),
        schema: report_schema(),
        max_tokens: None,
    };

    let body = match governor.run(gateway.generate_structured(&req)).await {
        Ok(reply) => {
            meter.record(reply.usage);
            match schema::str_field(&reply.value, "reportMarkdown") {
                Ok(md) => md.to_string(),
                Err(_) => fallback_report(topic, result),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "report generation failed; emitting plain findings");
            fallback_report(topic, result)
        }
    };

    format!("{}\n\n{}", body.trim_end(), sources_section(&result.sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekdeep_core::{Error, StructuredReply, TokenUsage, WeightedLearning};

    struct OneShotGateway(serde_json::Value);

    #[async_trait::async_trait]
    impl ModelGateway for OneShotGateway {
        async fn generate_structured(
            &self,
            _req: &StructuredRequest,
        ) -> seekdeep_core::Result<StructuredReply> {
            Ok(StructuredReply {
                value: self.0.clone(),
                usage: TokenUsage { total: 200 },
            })
        }
    }

    fn source(url: &str, score: f64, reasoning: &str) -> SourceMetadata {
        SourceMetadata {
            url: url.to_string(),
            title: None,
            domain: String::new(),
            reliability_score: score,
            reliability_reasoning: reasoning.to_string(),
        }
    }

    #[tokio::test]
    async fn sources_are_listed_reliability_descending() {
        let mut result = ResearchResult::default();
        result.merge_sources([
            source("https://mid.example", 0.5, "okay"),
            source("https://top.example", 0.9, "strong"),
            source("https://low.example", 0.2, "weak"),
        ]);
        let gateway = OneShotGateway(serde_json::json!({ "reportMarkdown": "# Report body" }));
        let governor = Governor::new(2);
        let meter = BudgetMeter::new(None);

        let md = write_report(&gateway, &governor, &meter, None, "topic", &result).await;
        assert!(md.starts_with("# Report body"));
        let top = md.find("https://top.example — Reliability: 0.90").unwrap();
        let mid = md.find("https://mid.example — Reliability: 0.50").unwrap();
        let low = md.find("https://low.example — Reliability: 0.20").unwrap();
        assert!(top < mid && mid < low);
        assert_eq!(meter.snapshot().used_tokens, 200);
    }

    #[tokio::test]
    async fn report_is_produced_even_when_the_model_fails() {
        struct FailingGateway;
        #[async_trait::async_trait]
        impl ModelGateway for FailingGateway {
            async fn generate_structured(
                &self,
                _req: &StructuredRequest,
            ) -> seekdeep_core::Result<StructuredReply> {
                Err(Error::Model("down".to_string()))
            }
        }

        let mut result = ResearchResult::default();
        result.merge_learnings([WeightedLearning {
            content: "a fact".to_string(),
            reliability: 0.7,
        }]);
        let governor = Governor::new(2);
        let meter = BudgetMeter::new(None);

        let md = write_report(&FailingGateway, &governor, &meter, None, "topic", &result).await;
        assert!(md.contains("a fact"));
        assert!(md.contains("## Sources"));
    }

    #[tokio::test]
    async fn empty_research_still_yields_a_report_with_empty_sources() {
        let gateway = OneShotGateway(serde_json::json!({ "reportMarkdown": "# Nothing found" }));
        let governor = Governor::new(2);
        let meter = BudgetMeter::new(None);
        let result = ResearchResult::default();

        let md = write_report(&gateway, &governor, &meter, None, "topic", &result).await;
        assert!(md.contains("# Nothing found"));
        assert!(md.trim_end().ends_with("## Sources"));
    }

    #[test]
    fn learnings_block_is_learning_tagged() {
        let mut result = ResearchResult::default();
        result.merge_learnings([WeightedLearning {
            content: "x".to_string(),
            reliability: 0.25,
        }]);
        assert_eq!(
            learnings_block(&result),
            "<learning reliability=\"0.25\">x</learning>"
        );
    }
}
