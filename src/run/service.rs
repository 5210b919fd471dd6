//! Starting runs: one spawned task and one event channel per run

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::controller::{new_id, RunController, RunSettings, RunSummary};
use super::request::RunRequest;
use super::sink::EventSink;
use crate::config::Config;
use crate::protocol::Event;
use crate::report::{self, ReportGenerator};
use crate::search::{self, SearchProvider};

/// A run in flight
#[derive(Debug)]
pub struct RunHandle {
    pub thread_id: String,
    pub run_id: String,
    /// Ordered events; closed after the terminal event
    pub events: mpsc::Receiver<Event>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<RunSummary>,
}

/// Collaborators and settings shared by all runs. Runs share nothing else.
#[derive(Clone)]
pub struct ResearchService {
    search: Arc<dyn SearchProvider>,
    reports: Arc<dyn ReportGenerator>,
    settings: RunSettings,
}

impl ResearchService {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        reports: Arc<dyn ReportGenerator>,
        settings: RunSettings,
    ) -> Self {
        Self {
            search,
            reports,
            settings,
        }
    }

    /// Wire up the collaborators named in the configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            search::from_config(config)?,
            report::from_config(config)?,
            RunSettings::from(config),
        ))
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Validate `request` and spawn its run. An invalid request still gets a
    /// handle; its stream holds a single `RUN_ERROR`.
    pub fn start_run(&self, mut request: RunRequest, cancel: CancellationToken) -> RunHandle {
        let thread_id = request.thread_id.get_or_insert_with(new_id).clone();
        let run_id = request.run_id.get_or_insert_with(new_id).clone();
        let (sink, events) = EventSink::channel(self.settings.event_buffer, cancel.clone());

        let prepared = RunController::prepare(
            request,
            Arc::clone(&self.search),
            Arc::clone(&self.reports),
            &self.settings,
            cancel.clone(),
        );

        let task = match prepared {
            Ok(controller) => tokio::spawn(controller.execute(sink)),
            Err(error) => {
                warn!(run_id = %run_id, error = %error, "Rejected run request");
                tokio::spawn(async move {
                    let message = error.to_string();
                    let _ = sink
                        .send_final(Event::run_error(message.clone(), Some(error.code().to_string())))
                        .await;
                    RunSummary::Rejected { message }
                })
            }
        };

        RunHandle {
            thread_id,
            run_id,
            events,
            cancel,
            task,
        }
    }
}
