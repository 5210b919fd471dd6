//! Scripted collaborators and event helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ag_ui_research_agent::error::CollaboratorError;
use ag_ui_research_agent::pipeline::DriverSettings;
use ag_ui_research_agent::protocol::Event;
use ag_ui_research_agent::report::{ReportGenerator, ReportRequest, ReportStream};
use ag_ui_research_agent::run::{ResearchService, RunSettings};
use ag_ui_research_agent::search::{SearchProvider, SearchResults};
use ag_ui_research_agent::state::{ReportSection, Source};

// =============================================================================
// SEARCH
// =============================================================================

/// Returns a fixed outcome, optionally after a delay
pub struct ScriptedSearch {
    outcome: Result<Vec<Source>, CollaboratorError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    pub fn returning(sources: Vec<Source>) -> Self {
        Self {
            outcome: Ok(sources),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, _query: &str) -> Result<SearchResults, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone().map(SearchResults::new)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// REPORT GENERATION
// =============================================================================

/// Emits the chunks scripted for each section; unscripted sections are empty
#[derive(Default)]
pub struct ScriptedReport {
    chunks: HashMap<ReportSection, Vec<String>>,
    failures: HashMap<ReportSection, CollaboratorError>,
    /// Cancelled when the given section is requested
    cancel_at: Option<(ReportSection, CancellationToken)>,
    /// Sleeps before answering the given section
    delays: HashMap<ReportSection, Duration>,
}

impl ScriptedReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, section: ReportSection, chunks: &[&str]) -> Self {
        self.chunks
            .insert(section, chunks.iter().map(|c| c.to_string()).collect());
        self
    }

    /// One paragraph for every section
    pub fn every_section() -> Self {
        ReportSection::ALL
            .into_iter()
            .fold(Self::new(), |report, section| {
                let text = format!("{section:?} paragraph.\n\n");
                report.section(section, &[text.as_str()])
            })
    }

    pub fn fail_at(mut self, section: ReportSection, error: CollaboratorError) -> Self {
        self.failures.insert(section, error);
        self
    }

    pub fn cancel_at(mut self, section: ReportSection, token: CancellationToken) -> Self {
        self.cancel_at = Some((section, token));
        self
    }

    pub fn delay_at(mut self, section: ReportSection, delay: Duration) -> Self {
        self.delays.insert(section, delay);
        self
    }
}

#[async_trait]
impl ReportGenerator for ScriptedReport {
    async fn generate(
        &self,
        _request: &ReportRequest,
        section: ReportSection,
    ) -> Result<ReportStream, CollaboratorError> {
        if let Some((at, token)) = &self.cancel_at {
            if *at == section {
                token.cancel();
            }
        }
        if let Some(delay) = self.delays.get(&section) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(error) = self.failures.get(&section) {
            return Err(error.clone());
        }
        Ok(ReportStream::from_chunks(
            self.chunks.get(&section).cloned().unwrap_or_default(),
        ))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

pub fn sources(count: usize) -> Vec<Source> {
    (1..=count)
        .map(|i| {
            Source::new(
                format!("hit-{i}"),
                format!("Source {i}"),
                format!("Snippet {i}"),
                format!("https://example.org/article-{i}"),
            )
        })
        .collect()
}

pub fn settings() -> RunSettings {
    RunSettings {
        driver: DriverSettings {
            search_timeout: Duration::from_secs(5),
            report_timeout: Duration::from_secs(5),
            max_sources: 5,
        },
        event_buffer: 16,
        partial_report_on_error: false,
    }
}

pub fn service(search: ScriptedSearch, report: ScriptedReport, settings: RunSettings) -> ResearchService {
    ResearchService::new(Arc::new(search), Arc::new(report), settings)
}

// =============================================================================
// EVENT HELPERS
// =============================================================================

pub async fn collect(mut events: mpsc::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Some(event) = events.recv().await {
        out.push(event);
    }
    out
}

pub fn types(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::event_type).collect()
}

pub fn count(events: &[Event], event_type: &str) -> usize {
    events
        .iter()
        .filter(|e| e.event_type() == event_type)
        .count()
}

/// Replay snapshot and deltas with an independent RFC 6902 implementation,
/// returning the state after every state event
pub fn fold_states(events: &[Event]) -> Vec<Value> {
    let mut doc: Option<Value> = None;
    let mut states = Vec::new();
    for event in events {
        match event {
            Event::StateSnapshot { snapshot } => doc = Some(snapshot.clone()),
            Event::StateDelta { delta } => {
                let current = doc.as_mut().expect("delta before snapshot");
                let ops: json_patch::Patch =
                    serde_json::from_value(serde_json::to_value(delta).unwrap()).unwrap();
                json_patch::patch(current, &ops).expect("delta applies cleanly");
            }
            _ => continue,
        }
        states.push(doc.clone().unwrap());
    }
    states
}

pub fn report_text(events: &[Event]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Event::TextMessageContent { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}
