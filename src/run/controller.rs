//! One research run from request to terminal event

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::request::RunRequest;
use super::sink::EventSink;
use crate::config::Config;
use crate::error::{Collaborator, ResearchError};
use crate::pipeline::driver::PROGRESS_ORGANIZED;
use crate::pipeline::{DriverSettings, StageDriver};
use crate::protocol::{Event, RunOutcome};
use crate::report::{chunk_paragraphs, ReportGenerator};
use crate::search::SearchProvider;
use crate::state::{AnalyzingStage, Processing, Progression, RunState, StateStore};

/// Settings shared by every run a service starts
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub driver: DriverSettings,
    /// Capacity of the event channel between a run and its client
    pub event_buffer: usize,
    /// Deliver already generated report text before `RUN_ERROR` when a later
    /// section fails
    pub partial_report_on_error: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            driver: DriverSettings::default(),
            event_buffer: 64,
            partial_report_on_error: false,
        }
    }
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            driver: DriverSettings {
                search_timeout: config.search_timeout,
                report_timeout: config.report_timeout,
                max_sources: config.max_search_results,
            },
            event_buffer: config.event_buffer,
            partial_report_on_error: config.partial_report_on_error,
        }
    }
}

/// How a run task ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    Completed,
    Stopped,
    Failed { code: &'static str, message: String },
    /// Invalid request; only a `RUN_ERROR` was sent
    Rejected { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartPoint {
    /// Run the pipeline from the store's current position
    Drive,
    /// The supplied state already holds a finished report
    Replay,
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Owns the state, driver and ids of exactly one run
pub struct RunController {
    thread_id: String,
    run_id: String,
    message_id: String,
    start: StartPoint,
    driver: StageDriver,
    partial_report_on_error: bool,
}

impl RunController {
    /// Validate the request and decide where the run starts. Nothing is
    /// emitted for a request that fails here.
    pub fn prepare(
        request: RunRequest,
        search: Arc<dyn SearchProvider>,
        reports: Arc<dyn ReportGenerator>,
        settings: &RunSettings,
        cancel: CancellationToken,
    ) -> Result<Self, ResearchError> {
        let query = request.resolved_query();
        let (store, start) = plan_start(&query, request.state)?;

        Ok(Self {
            thread_id: request.thread_id.unwrap_or_else(new_id),
            run_id: request.run_id.unwrap_or_else(new_id),
            message_id: new_id(),
            start,
            driver: StageDriver::new(store, search, reports, settings.driver.clone(), cancel),
            partial_report_on_error: settings.partial_report_on_error,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stream the run into `sink` until a terminal event
    pub async fn execute(mut self, sink: EventSink) -> RunSummary {
        info!(
            thread_id = %self.thread_id,
            run_id = %self.run_id,
            query = %self.driver.state().research.query,
            "Run started"
        );

        let started = Event::run_started(self.thread_id.clone(), self.run_id.clone());
        if sink.send(started).await.is_err() {
            return RunSummary::Stopped;
        }

        let result = match self.start {
            StartPoint::Drive => self.drive(&sink).await,
            StartPoint::Replay => self.replay(&sink).await,
        };

        match result {
            Ok(()) => {
                info!(run_id = %self.run_id, "Run completed");
                RunSummary::Completed
            }
            Err(ResearchError::Cancelled) => self.stop(&sink).await,
            Err(error) => self.fail(&sink, error).await,
        }
    }

    async fn drive(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        self.driver.publish(sink).await?;
        self.driver.run(sink).await?;

        // The completion delta is out; a stop from here on cannot undo it
        if let Err(e) = self.deliver(sink, self.driver.report_chunks()).await {
            warn!(run_id = %self.run_id, error = %e, "Client missed the end of a completed run");
        }
        Ok(())
    }

    async fn replay(&mut self, sink: &EventSink) -> Result<(), ResearchError> {
        info!(run_id = %self.run_id, "Replaying completed research");
        self.driver.publish(sink).await?;

        let report = self
            .driver
            .state()
            .processing
            .report
            .clone()
            .unwrap_or_default();
        self.deliver(sink, &chunk_paragraphs(&report)).await
    }

    /// The report text, then a completed `RUN_FINISHED`
    async fn deliver(&self, sink: &EventSink, chunks: &[String]) -> Result<(), ResearchError> {
        send_report(sink, &self.message_id, chunks).await?;
        self.finish(sink, RunOutcome::Completed).await
    }

    async fn finish(&self, sink: &EventSink, outcome: RunOutcome) -> Result<(), ResearchError> {
        sink.send_final(Event::run_finished(
            self.thread_id.clone(),
            self.run_id.clone(),
            outcome,
        ))
        .await
    }

    async fn stop(&self, sink: &EventSink) -> RunSummary {
        info!(run_id = %self.run_id, "Run stopped");
        // the client may already be gone
        let _ = self.finish(sink, RunOutcome::Stopped).await;
        RunSummary::Stopped
    }

    async fn fail(&mut self, sink: &EventSink, error: ResearchError) -> RunSummary {
        let code = error.code();
        if error.is_defect() {
            error!(run_id = %self.run_id, code, error = %error, "Run failed on a state defect");
        } else {
            warn!(run_id = %self.run_id, code, error = %error, "Run failed");
        }

        if let Err(e) = self.driver.record_failure(sink, &error).await {
            if e.is_cancelled() {
                return self.stop(sink).await;
            }
            error!(run_id = %self.run_id, error = %e, "Could not record failure in state");
        }

        let report_failed = matches!(
            &error,
            ResearchError::Collaborator(e) if e.collaborator == Collaborator::ReportGeneration
        );
        if self.partial_report_on_error && report_failed && !self.driver.report_chunks().is_empty()
        {
            info!(
                chunks = self.driver.report_chunks().len(),
                "Delivering partial report"
            );
            if send_report(sink, &self.message_id, self.driver.report_chunks())
                .await
                .is_err()
            {
                return RunSummary::Stopped;
            }
        }

        let message = error.to_string();
        let _ = sink
            .send_final(Event::run_error(message.clone(), Some(code.to_string())))
            .await;
        RunSummary::Failed { code, message }
    }
}

/// The report as one text message: start, one content event per chunk, end
async fn send_report(
    sink: &EventSink,
    message_id: &str,
    chunks: &[String],
) -> Result<(), ResearchError> {
    sink.send_final(Event::text_message_start(message_id)).await?;
    for chunk in chunks.iter().filter(|c| !c.is_empty()) {
        sink.send_final(Event::text_message_content(message_id, chunk.as_str()))
            .await?;
    }
    sink.send_final(Event::text_message_end(message_id)).await
}

/// Decide the initial state of a run.
///
/// - no prior state: a fresh run for `query`
/// - a finished report: replay it
/// - organized sources and no error: continue at report generation
/// - anything else: start over with the prior query
fn plan_start(
    query: &str,
    prior: Option<Value>,
) -> Result<(StateStore, StartPoint), ResearchError> {
    let prior = prior.filter(|v| match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    });
    let Some(prior) = prior else {
        return fresh(query);
    };

    let prior: RunState = serde_json::from_value(prior).map_err(|e| {
        ResearchError::validation(format!("state is not a valid research state: {e}"))
    })?;
    prior
        .validate()
        .map_err(|e| ResearchError::validation(format!("state is inconsistent: {e}")))?;

    let prior_query = prior.research.query.trim().to_string();
    if !query.is_empty() && query != prior_query {
        return Err(ResearchError::validation(
            "query does not match the query of the supplied state",
        ));
    }

    let has_report = prior
        .processing
        .report
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    if prior.progression.is_terminal() && has_report {
        return Ok((StateStore::resume(prior)?, StartPoint::Replay));
    }

    let organized = Progression::AnalyzingInformation(AnalyzingStage::OrganizingData);
    if prior.status.error.is_none()
        && prior.progression >= organized
        && !prior.research.sources.is_empty()
    {
        return Ok((
            StateStore::resume(ready_for_report(prior))?,
            StartPoint::Drive,
        ));
    }

    fresh(&prior_query)
}

fn fresh(query: &str) -> Result<(StateStore, StartPoint), ResearchError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ResearchError::validation("query must not be empty"));
    }
    Ok((StateStore::initialize(query)?, StartPoint::Drive))
}

/// Rewind a prior state to "sources organized", keeping its sources
fn ready_for_report(prior: RunState) -> RunState {
    let mut state = prior;
    state.progression = Progression::AnalyzingInformation(AnalyzingStage::OrganizingData);
    state.status.error = None;
    state.research.completed = false;
    state.processing = Processing {
        progress: PROGRESS_ORGANIZED,
        report: None,
        completed: false,
        in_progress: false,
    };
    state.ui.show_sources = true;
    state.ui.active_tab = "chat".to_string();
    state
}
