//! The research pipeline as a sequence of validated state transitions
//!
//! Every step follows the same shape: check for cancellation, apply one
//! atomic mutation, publish the resulting delta, then (maybe) call a
//! collaborator. A step never starts before the previous step's event is in
//! the channel.

use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::organize::organize_sources;
use crate::error::{Collaborator, CollaboratorError, ResearchError, StateInvariantViolation};
use crate::protocol::Event;
use crate::report::{ReportGenerator, ReportRequest};
use crate::run::EventSink;
use crate::search::{SearchContext, SearchProvider, SearchResults};
use crate::state::{
    AnalyzingStage, Emission, GatheringStage, Progression, ReportSection, ReportStage, RunState,
    Source, StateStore,
};

// =============================================================================
// PROGRESS SCHEDULE
// =============================================================================
pub const PROGRESS_SEARCHING: f64 = 0.15;
pub const PROGRESS_ORGANIZING: f64 = 0.30;
pub const PROGRESS_ORGANIZED: f64 = 0.35;
pub const PROGRESS_GENERATING: f64 = 0.40;
const PROGRESS_SECTIONS_SPAN: f64 = 0.50;

/// Progress reported when report section `index` starts: 0.47 up to 0.90
pub fn section_progress(index: usize) -> f64 {
    let sections = ReportSection::ALL.len() as f64;
    let raw = PROGRESS_GENERATING + PROGRESS_SECTIONS_SPAN * (index as f64 + 1.0) / sections;
    (raw * 100.0).round() / 100.0
}

/// Per-run limits for the pipeline
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub search_timeout: Duration,
    pub report_timeout: Duration,
    pub max_sources: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(30),
            report_timeout: Duration::from_secs(120),
            max_sources: 5,
        }
    }
}

/// Drives one run's [`StateStore`] from its current position to completion
pub struct StageDriver {
    store: StateStore,
    search: Arc<dyn SearchProvider>,
    reports: Arc<dyn ReportGenerator>,
    settings: DriverSettings,
    cancel: CancellationToken,
    /// Non-source search material for the report writer. Not part of the
    /// run state, so a resumed run starts without it.
    search_context: SearchContext,
    /// Report text in generation order; empty chunks are never stored
    report_chunks: Vec<String>,
}

impl StageDriver {
    pub fn new(
        store: StateStore,
        search: Arc<dyn SearchProvider>,
        reports: Arc<dyn ReportGenerator>,
        settings: DriverSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            search,
            reports,
            settings,
            cancel,
            search_context: SearchContext::default(),
            report_chunks: Vec::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        self.store.state()
    }

    pub fn report_chunks(&self) -> &[String] {
        &self.report_chunks
    }

    /// Make the next publication a full snapshot
    pub fn resync(&mut self) {
        self.store.resync();
    }

    /// Send whatever the client has not seen yet. Empty deltas are skipped.
    pub async fn publish(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        match self.store.emit()? {
            Emission::Snapshot(snapshot) => sink.send(Event::state_snapshot(snapshot)).await,
            Emission::Delta(delta) if delta.is_empty() => Ok(()),
            Emission::Delta(delta) => sink.send(Event::state_delta(delta)).await,
        }
    }

    /// Run every remaining stage. Returns once the state is `report_complete`.
    pub async fn run(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        loop {
            let progression = self.store.state().progression;
            match progression {
                Progression::Idle => self.initialize(sink).await?,
                Progression::Initialized | Progression::GatheringInformation(_) => {
                    let results = self.gather(sink).await?;
                    self.search_context = results.context;
                    self.organize(sink, results.sources).await?;
                }
                Progression::AnalyzingInformation(_) => {
                    self.generate_report(sink).await?;
                    self.complete(sink).await?;
                }
                Progression::GeneratingReport(stage) => {
                    return Err(StateInvariantViolation::new(
                        "research.stage",
                        format!("cannot continue a run from inside report generation ({stage:?})"),
                    )
                    .into())
                }
                Progression::Completed => return Ok(()),
            }
        }
    }

    /// Mark the run failed and publish that change. Phase and stage stay where
    /// the failure happened.
    pub async fn record_failure(
        &mut self,
        sink: &EventSink,
        error: &ResearchError,
    ) -> Result<(), ResearchError> {
        let message = error.to_string();
        self.store.apply(|s| {
            s.status.error = Some(message);
            s.processing.in_progress = false;
        })?;
        self.publish(sink).await
    }

    // =========================================================================
    // STAGES
    // =========================================================================

    async fn initialize(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        self.transition(sink, |s| {
            s.progression = Progression::Initialized;
            s.status.timestamp = Some(Utc::now());
        })
        .await
    }

    async fn gather(&mut self, sink: &EventSink) -> Result<SearchResults, ResearchError> {
        self.transition(sink, |s| {
            s.progression = Progression::GatheringInformation(GatheringStage::Searching);
            s.processing.in_progress = true;
            s.processing.progress = s.processing.progress.max(PROGRESS_SEARCHING);
        })
        .await?;

        let query = self.store.state().research.query.clone();
        let search = Arc::clone(&self.search);
        info!(provider = search.name(), query = %query, "Searching");

        let results = self
            .call(Collaborator::Search, self.settings.search_timeout, async move {
                search.search(&query).await
            })
            .await?;
        debug!(
            hits = results.sources.len(),
            extras = !results.context.is_empty(),
            "Search returned"
        );
        Ok(results)
    }

    async fn organize(&mut self, sink: &EventSink, hits: Vec<Source>) -> Result<(), ResearchError> {
        self.transition(sink, |s| {
            s.progression = Progression::AnalyzingInformation(AnalyzingStage::OrganizingData);
            s.processing.progress = s.processing.progress.max(PROGRESS_ORGANIZING);
        })
        .await?;

        let sources = organize_sources(hits, self.settings.max_sources);
        if sources.is_empty() {
            return Err(
                CollaboratorError::search_permanent("no relevant research results were found")
                    .into(),
            );
        }
        info!(sources = sources.len(), "Sources organized");

        self.transition(sink, move |s| {
            s.research.sources_found = sources.len();
            s.research.sources = sources;
            s.ui.show_sources = true;
            s.processing.progress = s.processing.progress.max(PROGRESS_ORGANIZED);
        })
        .await
    }

    async fn generate_report(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        self.transition(sink, |s| {
            s.progression = Progression::GeneratingReport(ReportStage::CreatingDetailedReport);
            s.processing.in_progress = true;
            s.processing.progress = s.processing.progress.max(PROGRESS_GENERATING);
        })
        .await?;

        let state = self.store.state();
        let mut request =
            ReportRequest::new(state.research.query.clone(), state.research.sources.clone())
                .with_context(self.search_context.clone());
        info!(generator = self.reports.name(), "Generating report");

        for (index, section) in ReportSection::ALL.into_iter().enumerate() {
            let progress = section_progress(index);
            self.transition(sink, move |s| {
                s.progression = Progression::GeneratingReport(ReportStage::Section(section));
                s.processing.progress = s.processing.progress.max(progress);
            })
            .await?;

            let chunks = self
                .call(
                    Collaborator::ReportGeneration,
                    self.settings.report_timeout,
                    collect_section(self.reports.as_ref(), &request, section),
                )
                .await?;
            debug!(?section, chunks = chunks.len(), "Section generated");

            for chunk in chunks {
                request.draft.push_str(&chunk);
                self.report_chunks.push(chunk);
            }
        }

        Ok(())
    }

    async fn complete(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        let report = self.report_chunks.concat();
        if report.trim().is_empty() {
            return Err(
                CollaboratorError::report_permanent("no research results were generated").into(),
            );
        }

        self.transition(sink, move |s| {
            s.progression = Progression::Completed;
            s.research.completed = true;
            s.processing.completed = true;
            s.processing.in_progress = false;
            s.processing.progress = 1.0;
            s.processing.report = Some(report);
            s.ui.active_tab = "report".to_string();
        })
        .await
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Cancellation check, one atomic mutation, then its delta
    async fn transition<F>(&mut self, sink: &EventSink, mutate: F) -> Result<(), ResearchError>
    where
        F: FnOnce(&mut RunState),
    {
        if self.cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        self.store.apply(mutate)?;

        let state = self.store.state();
        debug!(
            phase = state.phase().as_str(),
            stage = ?state.stage(),
            progress = state.processing.progress,
            "Stage transition"
        );
        self.publish(sink).await
    }

    /// Await a collaborator within its time budget, giving up early on cancellation
    async fn call<T, F>(
        &self,
        collaborator: Collaborator,
        budget: Duration,
        work: F,
    ) -> Result<T, ResearchError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ResearchError::Cancelled),
            outcome = tokio::time::timeout(budget, work) => match outcome {
                Ok(result) => result.map_err(ResearchError::from),
                Err(_) => Err(CollaboratorError::timeout(collaborator, budget).into()),
            },
        }
    }
}

/// Drain one section's stream, dropping empty chunks
async fn collect_section(
    reports: &dyn ReportGenerator,
    request: &ReportRequest,
    section: ReportSection,
) -> Result<Vec<String>, CollaboratorError> {
    let mut stream = reports.generate(request, section).await?.into_inner();
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }
    Ok(chunks)
}
