//! Batched source reliability evaluation.
//!
//! One gateway call per SERP query scores every fetched page at once.
//! Evaluation failure must not halt research: any gateway error degrades
//! to neutral scores so downstream stages keep working.

use crate::budget::BudgetMeter;
use crate::governor::Governor;
use seekdeep_core::{
    schema::{self, Field, Schema},
    trim::trim_to_tokens,
    types::{clamp_unit, domain_of},
    FetchedPage, ModelGateway, SerpQuery, SourceEvaluation, StructuredRequest,
};

/// Markdown budget per source in the evaluation prompt.
pub const SNIPPET_TOKENS: usize = 3_000;

fn evaluation_schema() -> Schema {
    Schema::object(vec![Field::required(
        "evaluations",
        "one entry per source, in any order",
        Schema::array(Schema::object(vec![
            Field::required("index", "0-based source index", Schema::Integer {
                minimum: Some(0),
                maximum: None,
            }),
            Field::required("score", "reliability estimate", Schema::unit_number()),
            Field::required("reasoning", "one or two sentences", Schema::String),
            Field::required("use", "false only when the source should be excluded", Schema::Boolean),
            Field::optional(
                "preferenceReason",
                "set when the user's source preferences drove the decision",
                Schema::String,
            ),
        ])),
    )])
}

const SYSTEM: &str = "You assess web sources for a research pipeline. For each \
source, estimate how reliable it is for the given research query (0 = worthless, \
1 = authoritative) and decide whether it is suitable to learn from. Judge \
holistically: authorship, evidence, recency, and fit to the query. Do not reward \
keyword matches.";

fn evaluation_prompt(serp: &SerpQuery, pages: &[FetchedPage], preferences: Option<&str>) -> String {
    let mut prompt = format!(
        "Search query: {}\nResearch goal: {}\n",
        serp.query, serp.research_goal
    );
    if let Some(prefs) = preferences {
        prompt.push_str(&format!("\nUser source preferences:\n{prefs}\n"));
    }
    for (index, page) in pages.iter().enumerate() {
        prompt.push_str(&format!(
            "\n--- Source {index} ---\nurl: {}\ndomain: {}\n",
            page.url,
            domain_of(&page.url),
        ));
        if let Some(title) = page.title.as_deref() {
            prompt.push_str(&format!("title: {title}\n"));
        }
        prompt.push_str(trim_to_tokens(&page.markdown, SNIPPET_TOKENS));
        prompt.push('\n');
    }
    prompt
}

fn neutral_evaluation(page: &FetchedPage, reasoning: &str) -> SourceEvaluation {
    SourceEvaluation {
        score: 0.5,
        reasoning: reasoning.to_string(),
        use_source: true,
        preference_reason: None,
        domain: domain_of(&page.url),
    }
}

/// Score `pages` for `serp`, index-aligned with the input. Never fails:
/// gateway errors fall back to `score=0.5, use=true` for every page.
pub async fn evaluate_sources(
    gateway: &dyn ModelGateway,
    governor: &Governor,
    meter: &BudgetMeter,
    model: Option<&str>,
    serp: &SerpQuery,
    pages: &[FetchedPage],
    preferences: Option<&str>,
) -> Vec<SourceEvaluation> {
    if pages.is_empty() {
        return Vec::new();
    }

    let req = StructuredRequest {
        model: model.map(str::to_string),
        system: SYSTEM.to_string(),
        prompt: evaluation_prompt(serp, pages, preferences),
        schema: evaluation_schema(),
        max_tokens: None,
    };

    let reply = match governor.run(gateway.generate_structured(&req)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(query = %serp.query, error = %e, "source evaluation failed; using neutral scores");
            return pages
                .iter()
                .map(|p| neutral_evaluation(p, "Evaluation failed"))
                .collect();
        }
    };
    meter.record(reply.usage);

    // Index-align with the input; entries the model skipped stay neutral,
    // out-of-range indices are ignored.
    let mut evaluations: Vec<SourceEvaluation> = pages
        .iter()
        .map(|p| neutral_evaluation(p, "Not evaluated"))
        .collect();
    if let Ok(items) = schema::array_field(&reply.value, "evaluations") {
        for item in items {
            let Some(index) = schema::opt_i64_field(item, "index") else {
                continue;
            };
            let Ok(index) = usize::try_from(index) else {
                continue;
            };
            if index >= pages.len() {
                continue;
            }
            evaluations[index] = SourceEvaluation {
                score: clamp_unit(schema::f64_field(item, "score").unwrap_or(0.5)),
                reasoning: schema::opt_str_field(item, "reasoning")
                    .unwrap_or("No reasoning given")
                    .to_string(),
                use_source: schema::bool_field(item, "use").unwrap_or(true),
                preference_reason: schema::opt_str_field(item, "preferenceReason")
                    .map(str::to_string),
                domain: domain_of(&pages[index].url),
            };
        }
    }
    evaluations
}
