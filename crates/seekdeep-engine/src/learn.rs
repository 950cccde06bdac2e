//! Learning extraction: turn surviving sources into weighted learnings and
//! prioritized follow-up questions.

use crate::budget::BudgetMeter;
use crate::governor::Governor;
use seekdeep_core::{
    schema::{self, Field, Schema},
    trim::trim_to_tokens,
    types::clamp_unit,
    Error, FetchedPage, ModelGateway, ResearchDirection, Result, SerpQuery, SourceEvaluation,
    StructuredRequest, WeightedLearning,
};
use std::time::Duration;

/// Markdown budget per source in the extraction prompt.
pub const SOURCE_BODY_TOKENS: usize = 25_000;
/// Wall-clock deadline on the extraction call itself.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_NUM_LEARNINGS: usize = 3;

const DEFAULT_FOLLOW_UP_PRIORITY: i64 = 3;

#[derive(Debug, Clone, Default)]
pub struct SourceQuality {
    pub most_reliable_domains: Vec<String>,
    pub content_gaps: Vec<String>,
    pub analysis: String,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub learnings: Vec<WeightedLearning>,
    pub follow_ups: Vec<ResearchDirection>,
    pub source_quality: Option<SourceQuality>,
}

fn extraction_schema(num_learnings: usize, max_follow_ups: usize) -> Schema {
    Schema::object(vec![
        Field::required(
            "learnings",
            "distinct facts established by the sources",
            Schema::array_max(
                Schema::object(vec![
                    Field::required("content", "one self-contained fact", Schema::String),
                    Field::required("confidence", "how well the sources support it", Schema::unit_number()),
                    Field::optional("sources", "supporting domains", Schema::array(Schema::String)),
                ]),
                num_learnings,
            ),
        ),
        Field::required(
            "followUpQuestions",
            "what to research next",
            Schema::array_max(
                Schema::object(vec![
                    Field::required("question", "a concrete next question", Schema::String),
                    Field::optional(
                        "priority",
                        "5 = most important",
                        Schema::Integer {
                            minimum: Some(1),
                            maximum: Some(5),
                        },
                    ),
                    Field::optional("reasoning", "why this matters", Schema::String),
                ]),
                max_follow_ups,
            ),
        ),
        Field::optional(
            "sourceQuality",
            "one-paragraph read on the source pool",
            Schema::object(vec![
                Field::optional("mostReliableDomains", "", Schema::array(Schema::String)),
                Field::optional("contentGaps", "", Schema::array(Schema::String)),
                Field::optional("analysis", "", Schema::String),
            ]),
        ),
    ])
}

const SYSTEM: &str = "You extract research learnings from web sources. Each \
learning must be a single, self-contained, information-dense fact with a \
confidence score reflecting how strongly the sources support it. Prefer facts \
from the most reliable sources. Then propose prioritized follow-up questions \
that would deepen the research.";

fn extraction_prompt(
    serp: &SerpQuery,
    survivors: &[(&FetchedPage, &SourceEvaluation)],
    num_learnings: usize,
    max_follow_ups: usize,
) -> String {
    let mut prompt = format!(
        "Search query: {}\nResearch goal: {}\n\nProduce up to {num_learnings} learnings and up to \
         {max_follow_ups} follow-up questions (priority 1-5, 5 = most important).\n",
        serp.query, serp.research_goal
    );
    for (page, eval) in survivors {
        prompt.push_str(&format!(
            "\n--- Source (reliability {:.2}) {} ---\nurl: {}\n",
            eval.score, eval.domain, page.url
        ));
        if let Some(title) = page.title.as_deref() {
            prompt.push_str(&format!("title: {title}\n"));
        }
        prompt.push_str(trim_to_tokens(&page.markdown, SOURCE_BODY_TOKENS));
        prompt.push('\n');
    }
    prompt
}

/// Run one extraction call over the evaluator's survivors.
///
/// Sorts survivors by reliability descending and drops those below the
/// query's threshold first; with zero survivors left the model is never
/// called and the extraction is empty.
pub async fn extract_learnings(
    gateway: &dyn ModelGateway,
    governor: &Governor,
    meter: &BudgetMeter,
    model: Option<&str>,
    serp: &SerpQuery,
    survivors: Vec<(&FetchedPage, &SourceEvaluation)>,
    num_learnings: usize,
    max_follow_ups: usize,
) -> Result<Extraction> {
    let mut survivors = survivors;
    survivors.sort_by(|a, b| {
        b.1.score
            .partial_cmp(&a.1.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    survivors.retain(|(_, eval)| eval.score >= serp.reliability_threshold);
    if survivors.is_empty() {
        return Ok(Extraction::default());
    }

    let req = StructuredRequest {
        model: model.map(str::to_string),
        system: SYSTEM.to_string(),
        prompt: extraction_prompt(serp, &survivors, num_learnings, max_follow_ups),
        schema: extraction_schema(num_learnings, max_follow_ups),
        max_tokens: None,
    };

    let reply = governor
        .run(async {
            tokio::time::timeout(EXTRACT_TIMEOUT, gateway.generate_structured(&req))
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "learning extraction exceeded {}s",
                        EXTRACT_TIMEOUT.as_secs()
                    ))
                })?
        })
        .await?;
    meter.record(reply.usage);

    let mut extraction = Extraction::default();
    for item in schema::array_field(&reply.value, "learnings")? {
        let content = schema::str_field(item, "content")?.trim();
        if content.is_empty() {
            continue;
        }
        if extraction.learnings.len() >= num_learnings {
            break;
        }
        extraction.learnings.push(WeightedLearning {
            content: content.to_string(),
            reliability: clamp_unit(schema::f64_field(item, "confidence").unwrap_or(0.5)),
        });
    }
    for item in schema::array_field(&reply.value, "followUpQuestions")? {
        let Some(question) = schema::opt_str_field(item, "question") else {
            continue;
        };
        if extraction.follow_ups.len() >= max_follow_ups {
            break;
        }
        extraction.follow_ups.push(ResearchDirection {
            question: question.to_string(),
            priority: schema::opt_i64_field(item, "priority").unwrap_or(DEFAULT_FOLLOW_UP_PRIORITY),
            parent_goal: Some(serp.research_goal.clone()),
        });
    }
    if let Some(quality) = reply.value.get("sourceQuality").filter(|v| v.is_object()) {
        let list = |name: &str| -> Vec<String> {
            schema::opt_array_field(quality, name)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        extraction.source_quality = Some(SourceQuality {
            most_reliable_domains: list("mostReliableDomains"),
            content_gaps: list("contentGaps"),
            analysis: schema::opt_str_field(quality, "analysis")
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(extraction)
}
