//! Recursive research orchestration.
//!
//! A research invocation is a tree: each node plans up to `breadth` SERP
//! queries, runs the search -> pre-filter -> fetch -> evaluate -> extract
//! pipeline for each, merges what they learned, then recurses per query
//! with halved breadth on the follow-up directions the extractor produced.
//! Accumulators move by value; the budget meter is the only shared state.

use crate::budget::BudgetMeter;
use crate::governor::Governor;
use crate::{evaluate, fetch, learn, plan, prefilter, report, search};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use seekdeep_core::{
    Error, ModelGateway, PageFetcher, ResearchDirection, ResearchResult, Result, SearchBackend,
    SearchOptions, SerpQuery, SourceMetadata, WeightedLearning,
};
use std::sync::Arc;
use std::time::Duration;

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(45);

pub const MIN_BREADTH: u8 = 1;
pub const MAX_BREADTH: u8 = 5;
pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 5;

#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub topic: String,
    pub breadth: u8,
    pub depth: u8,
    /// `provider:model`; `None` uses the gateway default.
    pub model: Option<String>,
    /// Soft cap on research-phase model tokens.
    pub token_budget: Option<u64>,
    pub source_preferences: Option<String>,
}

/// What one SERP query pipeline contributed.
#[derive(Debug, Default)]
struct SerpOutcome {
    learnings: Vec<WeightedLearning>,
    sources: Vec<SourceMetadata>,
    visited: Vec<String>,
    follow_ups: Vec<ResearchDirection>,
}

pub struct ResearchEngine {
    gateway: Arc<dyn ModelGateway>,
    search: Arc<dyn SearchBackend>,
    fetcher: Arc<dyn PageFetcher>,
    governor: Governor,
    num_learnings: usize,
}

impl ResearchEngine {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        search: Arc<dyn SearchBackend>,
        fetcher: Arc<dyn PageFetcher>,
        concurrency: usize,
    ) -> Self {
        Self {
            gateway,
            search,
            fetcher,
            governor: Governor::new(concurrency),
            num_learnings: learn::DEFAULT_NUM_LEARNINGS,
        }
    }

    /// Override the per-query learning cap (default 3).
    pub fn with_num_learnings(mut self, num_learnings: usize) -> Self {
        self.num_learnings = num_learnings.max(1);
        self
    }

    /// Run the full invocation: research tree plus final report.
    ///
    /// The report call is not budget-gated; it runs even when the research
    /// phase exhausted the cap.
    pub async fn run(&self, req: &ResearchRequest) -> Result<String> {
        Ok(self.run_detailed(req).await?.1)
    }

    /// Like [`run`](Self::run), but also returns the merged accumulators
    /// (with a budget snapshot that includes the report call).
    pub async fn run_detailed(&self, req: &ResearchRequest) -> Result<(ResearchResult, String)> {
        let meter = BudgetMeter::new(req.token_budget);
        let mut result = self.research_with(req, &meter).await?;
        let markdown = report::write_report(
            self.gateway.as_ref(),
            &self.governor,
            &meter,
            req.model.as_deref(),
            &req.topic,
            &result,
        )
        .await;
        result.budget = meter.snapshot();
        Ok((result, markdown))
    }

    /// Run the research tree only and return the merged accumulators.
    pub async fn research(&self, req: &ResearchRequest) -> Result<ResearchResult> {
        let meter = BudgetMeter::new(req.token_budget);
        self.research_with(req, &meter).await
    }

    async fn research_with(
        &self,
        req: &ResearchRequest,
        meter: &BudgetMeter,
    ) -> Result<ResearchResult> {
        if req.topic.trim().is_empty() {
            return Err(Error::NotConfigured("empty research topic".to_string()));
        }
        let breadth = req.breadth.clamp(MIN_BREADTH, MAX_BREADTH) as usize;
        let depth = req.depth.clamp(MIN_DEPTH, MAX_DEPTH) as u32;
        let preferences = req
            .source_preferences
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut result = self
            .node(
                req.topic.clone(),
                breadth,
                depth,
                ResearchResult::default(),
                Vec::new(),
                req.model.as_deref(),
                preferences,
                meter,
            )
            .await;
        result.budget = meter.snapshot();
        Ok(result)
    }

    /// One node of the research tree. Degrades instead of failing: a
    /// planning error returns the seeded accumulators unchanged.
    #[allow(clippy::too_many_arguments)]
    fn node<'a>(
        &'a self,
        topic: String,
        breadth: usize,
        depth: u32,
        seeds: ResearchResult,
        directions: Vec<ResearchDirection>,
        model: Option<&'a str>,
        preferences: Option<&'a str>,
        meter: &'a BudgetMeter,
    ) -> BoxFuture<'a, ResearchResult> {
        async move {
            let mut acc = seeds;

            tracing::info!(%topic, breadth, depth, "research node starting");
            let queries = match plan::plan_queries(
                self.gateway.as_ref(),
                &self.governor,
                meter,
                model,
                &topic,
                breadth,
                &acc.learnings,
                &directions,
                preferences,
            )
            .await
            {
                Ok(queries) => queries,
                Err(e) => {
                    tracing::warn!(%topic, error = %e, "query planning failed; keeping seeded results");
                    return acc;
                }
            };
            if queries.is_empty() {
                return acc;
            }

            let outcomes = join_all(
                queries
                    .iter()
                    .map(|serp| self.run_serp(serp, model, preferences, meter, breadth)),
            )
            .await;

            let mut child_specs: Vec<(String, Vec<ResearchDirection>)> = Vec::new();
            for (serp, outcome) in queries.iter().zip(outcomes) {
                match outcome {
                    Ok(Some(outcome)) => {
                        acc.merge_learnings(outcome.learnings);
                        acc.merge_sources(outcome.sources);
                        acc.merge_visited(outcome.visited);
                        if !outcome.follow_ups.is_empty() {
                            child_specs.push((serp.research_goal.clone(), outcome.follow_ups));
                        }
                    }
                    // Skipped: the budget was already reached when it would have started.
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(query = %serp.query, error = %e, "serp pipeline failed; siblings continue");
                    }
                }
            }

            if depth > 1 && !meter.reached() {
                let child_breadth = breadth.div_ceil(2);
                let mut children = Vec::new();
                for (goal, mut follow_ups) in child_specs {
                    if meter.reached() {
                        break;
                    }
                    follow_ups.sort_by(|a, b| b.priority.cmp(&a.priority));
                    let bullets = follow_ups
                        .iter()
                        .map(|d| format!("- {}", d.question))
                        .collect::<Vec<_>>()
                        .join("\n");
                    let child_topic = format!(
                        "Previous research goal: {goal}\nFollow-up research directions:\n{bullets}"
                    );
                    children.push(self.node(
                        child_topic,
                        child_breadth,
                        depth - 1,
                        acc.clone(),
                        follow_ups,
                        model,
                        preferences,
                        meter,
                    ));
                }
                for child in join_all(children).await {
                    acc.absorb(child);
                }
            }

            acc
        }
        .boxed()
    }

    /// One SERP query pipeline: search -> pre-filter -> fetch -> evaluate
    /// -> extract. Returns `Ok(None)` when skipped because the budget was
    /// already reached.
    async fn run_serp(
        &self,
        serp: &SerpQuery,
        model: Option<&str>,
        preferences: Option<&str>,
        meter: &BudgetMeter,
        breadth: usize,
    ) -> Result<Option<SerpOutcome>> {
        if meter.reached() {
            tracing::debug!(query = %serp.query, "budget reached; not starting serp pipeline");
            return Ok(None);
        }

        let limit = if serp.is_verification {
            search::VERIFICATION_RESULT_LIMIT
        } else {
            search::DEFAULT_RESULT_LIMIT
        };
        let opts = SearchOptions {
            timeout: SEARCH_TIMEOUT,
            limit,
        };
        let hits = self
            .governor
            .run(self.search.search(&serp.query, &opts))
            .await?;
        if hits.is_empty() {
            return Ok(Some(SerpOutcome::default()));
        }

        let kept = prefilter::filter_hits(
            self.gateway.as_ref(),
            &self.governor,
            meter,
            model,
            serp,
            &hits,
            preferences,
        )
        .await?;
        if kept.is_empty() {
            tracing::debug!(query = %serp.query, "pre-filter dropped every hit");
            return Ok(Some(SerpOutcome::default()));
        }

        let urls: Vec<String> = kept.into_iter().map(|h| h.url).collect();
        let pages = fetch::batch_fetch(&self.fetcher, &self.governor, &urls).await;
        let visited: Vec<String> = pages.iter().map(|p| p.url.clone()).collect();
        if pages.is_empty() {
            return Ok(Some(SerpOutcome {
                visited,
                ..SerpOutcome::default()
            }));
        }

        let evaluations = evaluate::evaluate_sources(
            self.gateway.as_ref(),
            &self.governor,
            meter,
            model,
            serp,
            &pages,
            preferences,
        )
        .await;
        let sources: Vec<SourceMetadata> = pages
            .iter()
            .zip(&evaluations)
            .map(|(page, eval)| SourceMetadata {
                url: page.url.clone(),
                title: page.title.clone(),
                domain: eval.domain.clone(),
                reliability_score: eval.score,
                reliability_reasoning: eval.reasoning.clone(),
            })
            .collect();

        let survivors: Vec<_> = pages
            .iter()
            .zip(&evaluations)
            .filter(|(_, eval)| eval.use_source)
            .collect();
        match learn::extract_learnings(
            self.gateway.as_ref(),
            &self.governor,
            meter,
            model,
            serp,
            survivors,
            self.num_learnings,
            breadth.div_ceil(2),
        )
        .await
        {
            Ok(extraction) => Ok(Some(SerpOutcome {
                learnings: extraction.learnings,
                sources,
                visited,
                follow_ups: extraction.follow_ups,
            })),
            Err(e) => {
                // The evaluator's metadata survives an extraction failure so
                // the Sources section still credits what was fetched.
                tracing::warn!(query = %serp.query, error = %e, "learning extraction failed; keeping source metadata");
                Ok(Some(SerpOutcome {
                    sources,
                    visited,
                    ..SerpOutcome::default()
                }))
            }
        }
    }
}
