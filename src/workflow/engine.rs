//! The adaptive research workflow engine.
//!
//! A state machine over [`WorkflowStage`], Initialization to Completion. The
//! strategy chosen at Initialization decides which stages participate and how
//! much each one does; Analysis may escalate the depth once when too few
//! credible sources survive, and a stage that fails twice degrades the depth
//! and skips the remaining heavy stages instead of failing the run.
//!
//! The engine always emits `Findings`, sparse ones under degradation, with
//! a single exception: when Discovery yields nothing *and* the search
//! capability itself failed, there is no material to synthesize from and the
//! capability error propagates to the caller.
//!
//! Suspension points are exactly the injected capability calls
//! ([`SearchProvider`], [`ContentFetcher`]); everything between them is pure
//! CPU. Each stage transition emits a [`ProgressUpdate`] through an optional
//! `flume` channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::capabilities::{
    CapabilityError, ContentFetcher, ResearchProvider, SearchHit, SearchProvider,
};
use crate::types::{Findings, Keyword, Source};

use super::credibility;
use super::stage::{ProgressUpdate, WorkflowStage};
use super::strategy::Strategy;

/// Engine knobs; defaults are sensible for real providers.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Minimum credible sources Analysis wants before settling; fewer
    /// triggers the single depth escalation.
    pub min_credible_sources: usize,
    /// Sources scoring below this are filtered out during Analysis.
    pub credibility_floor: f32,
    /// Bound on each individual capability call.
    pub stage_timeout: Duration,
    /// Delay before the single per-stage retry.
    pub retry_backoff: Duration,
    /// Cap on characters of fetched content kept per source.
    pub excerpt_limit: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            min_credible_sources: 3,
            credibility_floor: 0.5,
            stage_timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_millis(200),
            excerpt_limit: 1200,
        }
    }
}

/// Mutable working state threaded through the stages of one run.
#[derive(Debug)]
struct ResearchDraft {
    keyword: Keyword,
    strategy: Strategy,
    escalated: bool,
    degraded: bool,
    /// The search capability returned successfully at least once, even if
    /// with zero hits. Distinguishes "nothing out there" from "search down".
    search_succeeded: bool,
    hits: Vec<SearchHit>,
    sources: Vec<Source>,
    total_seen: usize,
    search_query: String,
    summary: String,
    main_findings: Vec<String>,
    statistics: Vec<String>,
    gaps: Vec<String>,
}

impl ResearchDraft {
    fn new(keyword: &Keyword) -> Self {
        Self {
            keyword: keyword.clone(),
            strategy: Strategy::for_keyword(keyword.normalized()),
            escalated: false,
            degraded: false,
            search_succeeded: false,
            hits: Vec::new(),
            sources: Vec::new(),
            total_seen: 0,
            search_query: String::new(),
            summary: String::new(),
            main_findings: Vec::new(),
            statistics: Vec::new(),
            gaps: Vec::new(),
        }
    }

    fn into_findings(self) -> Findings {
        let total = self.total_seen.max(self.sources.len());
        Findings {
            keyword: self.keyword.raw().to_string(),
            summary: self.summary,
            sources: self.sources,
            main_findings: self.main_findings,
            statistics: self.statistics,
            gaps: self.gaps,
            total_sources_analyzed: total,
            search_query_used: self.search_query,
            timestamp: Utc::now(),
        }
    }
}

/// Where the state machine goes after a stage returns.
enum Transition {
    /// Follow the strategy's declared stage order.
    Next,
    /// Jump to a specific stage (Analysis re-running Discovery).
    Jump(WorkflowStage),
}

/// The 8-stage adaptive research pipeline.
///
/// Implements [`ResearchProvider`], so an engine instance slots directly into
/// [`RetrievalOrchestrator::retrieve_or_research`](crate::retrieval::RetrievalOrchestrator::retrieve_or_research)
/// as the fresh-research fallback.
pub struct ResearchWorkflow {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn ContentFetcher>,
    config: WorkflowConfig,
    progress: Option<flume::Sender<ProgressUpdate>>,
}

impl std::fmt::Debug for ResearchWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchWorkflow")
            .field("config", &self.config)
            .finish()
    }
}

impl ResearchWorkflow {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn ContentFetcher>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            search,
            fetcher,
            config,
            progress: None,
        }
    }

    /// Attach a progress channel; every stage transition sends one update.
    #[must_use]
    pub fn with_progress(mut self, sender: flume::Sender<ProgressUpdate>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Run the full pipeline for one keyword.
    #[instrument(skip(self), fields(keyword = %keyword.normalized()))]
    pub async fn run(&self, keyword: &Keyword) -> Result<Findings, CapabilityError> {
        let mut draft = ResearchDraft::new(keyword);
        let mut stage = WorkflowStage::Initialization;
        let mut completed = 0usize;

        loop {
            let transition = match self.attempt_stage(stage, &mut draft).await {
                Ok(transition) => transition,
                Err(err) => self.handle_stage_failure(stage, &mut draft, err)?,
            };

            completed += 1;
            self.emit_progress(stage, completed, &draft);

            if stage == WorkflowStage::Completion {
                break;
            }
            stage = match transition {
                Transition::Jump(target) => target,
                Transition::Next => draft
                    .strategy
                    .next_stage(stage)
                    .unwrap_or(WorkflowStage::Completion),
            };
        }

        Ok(draft.into_findings())
    }

    /// Execute a stage, retrying once with backoff on a recoverable error.
    async fn attempt_stage(
        &self,
        stage: WorkflowStage,
        draft: &mut ResearchDraft,
    ) -> Result<Transition, CapabilityError> {
        match self.execute_stage(stage, draft).await {
            Err(err) if err.is_retryable() => {
                debug!(target: "keywordsmith::workflow", %stage, %err, "stage retry");
                tokio::time::sleep(self.config.retry_backoff).await;
                self.execute_stage(stage, draft).await
            }
            other => other,
        }
    }

    /// A stage failed twice. Degrade instead of aborting, except when
    /// Discovery has nothing and the search capability itself is down.
    fn handle_stage_failure(
        &self,
        stage: WorkflowStage,
        draft: &mut ResearchDraft,
        err: CapabilityError,
    ) -> Result<Transition, CapabilityError> {
        if stage == WorkflowStage::Discovery && draft.hits.is_empty() && !draft.search_succeeded {
            return Err(err);
        }
        warn!(
            target: "keywordsmith::workflow",
            %stage, %err, "stage failed twice, degrading depth"
        );
        draft.degraded = true;
        draft.strategy.depth = draft.strategy.depth.degrade();
        draft
            .gaps
            .push(format!("{stage} was cut short ({err}); results may be incomplete"));
        // Skip whatever heavy stages remain and go straight to Synthesis.
        Ok(Transition::Jump(WorkflowStage::Synthesis))
    }

    async fn execute_stage(
        &self,
        stage: WorkflowStage,
        draft: &mut ResearchDraft,
    ) -> Result<Transition, CapabilityError> {
        match stage {
            WorkflowStage::Initialization => Ok(self.initialization(draft)),
            WorkflowStage::Discovery => self.discovery(draft).await,
            WorkflowStage::Analysis => Ok(self.analysis(draft)),
            WorkflowStage::Extraction => self.extraction(draft).await,
            WorkflowStage::Crawling => self.crawling(draft).await,
            WorkflowStage::Synthesis => Ok(self.synthesis(draft)),
            WorkflowStage::Validation => Ok(self.validation(draft)),
            WorkflowStage::Completion => Ok(Transition::Next),
        }
    }

    fn initialization(&self, draft: &mut ResearchDraft) -> Transition {
        draft.strategy = Strategy::for_keyword(draft.keyword.normalized());
        debug!(
            target: "keywordsmith::workflow",
            topic = ?draft.strategy.topic_type,
            depth = ?draft.strategy.depth,
            "strategy selected"
        );
        Transition::Next
    }

    async fn discovery(&self, draft: &mut ResearchDraft) -> Result<Transition, CapabilityError> {
        draft.search_query = build_query(draft);
        let limit = draft.strategy.depth.discovery_limit();
        let hits = self
            .bounded(self.search.search(&draft.search_query, limit))
            .await?;
        draft.search_succeeded = true;
        if hits.is_empty() {
            // Recoverable: the retry may see fresher results.
            return Err(CapabilityError::Unavailable(format!(
                "search returned no results for '{}'",
                draft.search_query
            )));
        }
        draft.total_seen += hits.len();
        draft.hits = hits;
        Ok(Transition::Next)
    }

    fn analysis(&self, draft: &mut ResearchDraft) -> Transition {
        let mut scored: Vec<Source> = draft
            .hits
            .iter()
            .map(|hit| {
                let domain = Source::domain_of(&hit.url);
                let marker_text = format!("{} {} {}", hit.title, hit.url, hit.snippet);
                Source {
                    title: hit.title.clone(),
                    url: hit.url.clone(),
                    credibility_score: credibility::score(&domain, &marker_text),
                    source_type: credibility::classify(&domain, &marker_text),
                    excerpt: hit.snippet.clone(),
                    domain,
                    authors: Vec::new(),
                    publication_date: None,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.credibility_score.total_cmp(&a.credibility_score));

        let credible: Vec<Source> = scored
            .iter()
            .filter(|s| s.credibility_score >= self.config.credibility_floor)
            .cloned()
            .collect();

        if credible.len() < self.config.min_credible_sources && !draft.escalated {
            draft.escalated = true;
            draft.strategy.depth = draft.strategy.depth.escalate();
            debug!(
                target: "keywordsmith::workflow",
                depth = ?draft.strategy.depth,
                credible = credible.len(),
                "too few credible sources, escalating and re-running discovery"
            );
            return Transition::Jump(WorkflowStage::Discovery);
        }

        draft.sources = if credible.is_empty() {
            draft
                .gaps
                .push("no sources cleared the credibility floor".to_string());
            scored.into_iter().take(self.config.min_credible_sources).collect()
        } else {
            credible
        };
        Transition::Next
    }

    async fn extraction(&self, draft: &mut ResearchDraft) -> Result<Transition, CapabilityError> {
        let top_n = draft.strategy.depth.extraction_top_n();
        let mut fetched = 0usize;
        let mut last_err = None;
        for source in draft.sources.iter_mut().take(top_n) {
            match self.bounded(self.fetcher.fetch(&source.url)).await {
                Ok(content) => {
                    fetched += 1;
                    source.excerpt = clip(&content, self.config.excerpt_limit);
                }
                Err(err) => {
                    debug!(
                        target: "keywordsmith::workflow",
                        url = %source.url, %err, "extraction fetch failed, keeping snippet"
                    );
                    last_err = Some(err);
                }
            }
        }
        // All fetches failing is a stage failure; partial success is not.
        if fetched == 0 {
            if let Some(err) = last_err {
                return Err(err);
            }
        }
        Ok(Transition::Next)
    }

    async fn crawling(&self, draft: &mut ResearchDraft) -> Result<Transition, CapabilityError> {
        let domains: Vec<String> = {
            let mut seen = Vec::new();
            for source in &draft.sources {
                if !seen.contains(&source.domain) {
                    seen.push(source.domain.clone());
                }
                if seen.len() == draft.strategy.depth.crawl_domains() {
                    break;
                }
            }
            seen
        };

        for domain in domains {
            let url = format!("https://{domain}/");
            match self.bounded(self.fetcher.fetch(&url)).await {
                Ok(content) if !content.trim().is_empty() => {
                    draft.total_seen += 1;
                    let marker_text = clip(&content, self.config.excerpt_limit);
                    draft.sources.push(Source {
                        title: format!("Related coverage on {domain}"),
                        url,
                        credibility_score: credibility::score(&domain, &marker_text),
                        source_type: credibility::classify(&domain, &marker_text),
                        excerpt: marker_text,
                        domain,
                        authors: Vec::new(),
                        publication_date: None,
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    // Crawling is opportunistic; a dead domain is not a
                    // stage failure.
                    debug!(
                        target: "keywordsmith::workflow",
                        %domain, %err, "crawl skipped"
                    );
                }
            }
        }
        Ok(Transition::Next)
    }

    fn synthesis(&self, draft: &mut ResearchDraft) -> Transition {
        let mut summary = String::new();
        for source in draft.sources.iter().take(5) {
            let lead = first_sentences(&source.excerpt, 2);
            if lead.is_empty() {
                continue;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(&lead);
        }
        draft.summary = summary;

        draft.main_findings = draft
            .sources
            .iter()
            .take(5)
            .filter_map(|s| {
                let lead = first_sentences(&s.excerpt, 1);
                (!lead.is_empty()).then(|| format!("{}: {lead}", s.title))
            })
            .collect();

        draft.statistics = draft
            .sources
            .iter()
            .flat_map(|s| numeric_sentences(&s.excerpt))
            .take(8)
            .collect();

        if draft.sources.len() < self.config.min_credible_sources {
            draft.gaps.push(format!(
                "only {} credible sources found; coverage is thin",
                draft.sources.len()
            ));
        }
        if draft.strategy.depth.extraction_top_n() == 0 {
            draft
                .gaps
                .push("full-content extraction skipped at surface depth".to_string());
        }
        Transition::Next
    }

    fn validation(&self, draft: &mut ResearchDraft) -> Transition {
        let consistent =
            !draft.summary.trim().is_empty() && draft.total_seen >= draft.sources.len();
        if !consistent {
            // Reduced-confidence fallback: rebuild the summary from raw
            // discovery snippets rather than aborting.
            warn!(target: "keywordsmith::workflow", "validation failed, using reduced-confidence synthesis");
            draft.summary = draft
                .hits
                .iter()
                .take(3)
                .map(|h| h.snippet.as_str())
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if draft.summary.trim().is_empty() {
                draft.summary = format!(
                    "No substantive material was found for '{}'.",
                    draft.keyword.raw()
                );
            }
            draft
                .gaps
                .push("synthesis validation failed; summary has reduced confidence".to_string());
        }
        Transition::Next
    }

    fn emit_progress(&self, stage: WorkflowStage, completed: usize, draft: &ResearchDraft) {
        let Some(sender) = &self.progress else {
            return;
        };
        let total = draft.strategy.stages().len().max(1);
        let percent = (completed as f32 / total as f32).min(1.0);
        let update = ProgressUpdate {
            stage,
            percent_complete: percent,
            message: match stage {
                WorkflowStage::Completion => {
                    format!("research complete: {} sources", draft.sources.len())
                }
                _ => format!("{stage} finished"),
            },
        };
        // A disconnected receiver just means nobody is listening.
        let _ = sender.send(update);
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, CapabilityError>>,
    ) -> Result<T, CapabilityError> {
        match tokio::time::timeout(self.config.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout {
                elapsed: self.config.stage_timeout,
            }),
        }
    }
}

#[async_trait]
impl ResearchProvider for ResearchWorkflow {
    async fn research(&self, keyword: &Keyword) -> Result<Findings, CapabilityError> {
        self.run(keyword).await
    }
}

fn build_query(draft: &ResearchDraft) -> String {
    use super::strategy::ResearchTool;
    let keyword = draft.keyword.normalized();
    match draft.strategy.tool_priorities.first() {
        Some(ResearchTool::AcademicSearch) => format!("{keyword} research study"),
        Some(ResearchTool::NewsSearch) => format!("{keyword} analysis news"),
        _ => keyword.to_string(),
    }
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.trim().to_string();
    }
    text.chars().take(limit).collect::<String>().trim().to_string()
}

fn first_sentences(text: &str, count: usize) -> String {
    text.unicode_sentences()
        .take(count)
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Sentences that carry a number; the raw material for the statistics list.
fn numeric_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(|s| s.trim().to_string())
        .filter(|s| s.len() >= 12)
        .collect()
}
