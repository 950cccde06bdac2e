//! SERP query planning.

use crate::budget::BudgetMeter;
use crate::governor::Governor;
use seekdeep_core::{
    schema::{self, Field, Schema},
    ModelGateway, ResearchDirection, Result, SerpQuery, StructuredRequest, WeightedLearning,
};

fn plan_schema(breadth: usize) -> Schema {
    Schema::object(vec![Field::required(
        "queries",
        "distinct search queries, most promising first",
        Schema::array_max(
            Schema::object(vec![
                Field::required("query", "the engine-facing search string", Schema::String),
                Field::required(
                    "researchGoal",
                    "what this query should establish",
                    Schema::String,
                ),
                Field::optional(
                    "reliabilityThreshold",
                    "minimum source reliability to learn from",
                    Schema::unit_number(),
                ),
                Field::optional(
                    "isVerificationQuery",
                    "true when corroborating a shaky prior learning",
                    Schema::Boolean,
                ),
                Field::optional(
                    "relatedDirection",
                    "the follow-up direction this query serves, verbatim",
                    Schema::String,
                ),
            ]),
            breadth,
        ),
    )])
}

const SYSTEM: &str = "You plan web searches for a research pipeline. Given a \
topic, produce distinct search queries that together cover it. Each query \
carries a research goal, a reliability threshold for its sources, and whether \
it is a verification query. Verify low-reliability prior learnings with \
corroborating searches; extend high-reliability ones into new ground. Never \
repeat a query that prior learnings already answer.";

fn plan_prompt(
    topic: &str,
    breadth: usize,
    learnings: &[WeightedLearning],
    directions: &[ResearchDirection],
    preferences: Option<&str>,
) -> String {
    let mut prompt = format!("Generate up to {breadth} search queries for this topic:\n{topic}\n");
    if !learnings.is_empty() {
        prompt.push_str(
            "\nPrior learnings (verify the low-reliability ones, build on the high-reliability ones):\n",
        );
        for l in learnings {
            prompt.push_str(&format!("- [reliability {:.2}] {}\n", l.reliability, l.content));
        }
    }
    if !directions.is_empty() {
        let mut sorted: Vec<&ResearchDirection> = directions.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
        prompt.push_str("\nResearch directions to pursue, most important first:\n");
        for d in sorted {
            match d.parent_goal.as_deref() {
                Some(goal) => prompt.push_str(&format!(
                    "- (priority {}) {} [from goal: {goal}]\n",
                    d.priority, d.question
                )),
                None => prompt.push_str(&format!("- (priority {}) {}\n", d.priority, d.question)),
            }
        }
    }
    if let Some(prefs) = preferences {
        prompt.push_str(&format!("\nUser source preferences:\n{prefs}\n"));
    }
    prompt
}

/// Generate up to `breadth` SERP queries for one research node.
pub async fn plan_queries(
    gateway: &dyn ModelGateway,
    governor: &Governor,
    meter: &BudgetMeter,
    model: Option<&str>,
    topic: &str,
    breadth: usize,
    learnings: &[WeightedLearning],
    directions: &[ResearchDirection],
    preferences: Option<&str>,
) -> Result<Vec<SerpQuery>> {
    let req = StructuredRequest {
        model: model.map(str::to_string),
        system: SYSTEM.to_string(),
        prompt: plan_prompt(topic, breadth, learnings, directions, preferences),
        schema: plan_schema(breadth),
        max_tokens: None,
    };
    let reply = governor.run(gateway.generate_structured(&req)).await?;
    meter.record(reply.usage);

    let mut queries = Vec::new();
    for item in schema::array_field(&reply.value, "queries")? {
        let Some(query) = schema::opt_str_field(item, "query") else {
            continue;
        };
        if queries.len() >= breadth {
            break;
        }
        queries.push(SerpQuery::new(
            query.to_string(),
            schema::opt_str_field(item, "researchGoal")
                .unwrap_or(query)
                .to_string(),
            item.get("reliabilityThreshold")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0),
            item.get("isVerificationQuery")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            schema::opt_str_field(item, "relatedDirection").map(str::to_string),
        ));
    }
    Ok(queries)
}
