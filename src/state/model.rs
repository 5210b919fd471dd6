//! Run state definition
//!
//! The pipeline position is a single sum type, [`Progression`], whose variants
//! only carry the stages that are valid for their phase. On the wire it is
//! split back into `status.phase` and `research.stage`, which is the shape
//! AG-UI clients render from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::StateInvariantViolation;

/// Coarse pipeline phase, in the only order a run may visit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Initialized,
    GatheringInformation,
    AnalyzingInformation,
    GeneratingReport,
    Completed,
}

impl Phase {
    /// Get the next phase in the pipeline
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Initialized),
            Self::Initialized => Some(Self::GatheringInformation),
            Self::GatheringInformation => Some(Self::AnalyzingInformation),
            Self::AnalyzingInformation => Some(Self::GeneratingReport),
            Self::GeneratingReport => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initialized => "initialized",
            Self::GatheringInformation => "gathering_information",
            Self::AnalyzingInformation => "analyzing_information",
            Self::GeneratingReport => "generating_report",
            Self::Completed => "completed",
        }
    }

    fn ordinal(&self) -> usize {
        *self as usize
    }
}

/// Fine-grained stage as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    Searching,
    OrganizingData,
    CreatingDetailedReport,
    OutliningReport,
    DraftingExecutiveSummary,
    WritingIntroduction,
    CompilingKeyFindings,
    DevelopingAnalysis,
    FormingConclusions,
    FinalizingReport,
    ReportComplete,
}

/// Sub-stages of report generation; each one produces one part of the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportSection {
    Outline,
    ExecutiveSummary,
    Introduction,
    KeyFindings,
    Analysis,
    Conclusions,
    Finalize,
}

impl ReportSection {
    /// All sections in generation order
    pub const ALL: [ReportSection; 7] = [
        ReportSection::Outline,
        ReportSection::ExecutiveSummary,
        ReportSection::Introduction,
        ReportSection::KeyFindings,
        ReportSection::Analysis,
        ReportSection::Conclusions,
        ReportSection::Finalize,
    ];

    pub fn stage(&self) -> Stage {
        match self {
            Self::Outline => Stage::OutliningReport,
            Self::ExecutiveSummary => Stage::DraftingExecutiveSummary,
            Self::Introduction => Stage::WritingIntroduction,
            Self::KeyFindings => Stage::CompilingKeyFindings,
            Self::Analysis => Stage::DevelopingAnalysis,
            Self::Conclusions => Stage::FormingConclusions,
            Self::Finalize => Stage::FinalizingReport,
        }
    }

    fn from_stage(stage: Stage) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.stage() == stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GatheringStage {
    Searching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnalyzingStage {
    OrganizingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportStage {
    CreatingDetailedReport,
    Section(ReportSection),
}

/// Where a run is in the pipeline.
///
/// The derived ordering follows pipeline order, so `a < b` means `b` comes
/// later in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Progression {
    #[default]
    Idle,
    Initialized,
    GatheringInformation(GatheringStage),
    AnalyzingInformation(AnalyzingStage),
    GeneratingReport(ReportStage),
    Completed,
}

impl Progression {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Initialized => Phase::Initialized,
            Self::GatheringInformation(_) => Phase::GatheringInformation,
            Self::AnalyzingInformation(_) => Phase::AnalyzingInformation,
            Self::GeneratingReport(_) => Phase::GeneratingReport,
            Self::Completed => Phase::Completed,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Idle | Self::Initialized => Stage::NotStarted,
            Self::GatheringInformation(GatheringStage::Searching) => Stage::Searching,
            Self::AnalyzingInformation(AnalyzingStage::OrganizingData) => Stage::OrganizingData,
            Self::GeneratingReport(ReportStage::CreatingDetailedReport) => {
                Stage::CreatingDetailedReport
            }
            Self::GeneratingReport(ReportStage::Section(section)) => section.stage(),
            Self::Completed => Stage::ReportComplete,
        }
    }

    /// Rebuild from the wire pair, rejecting combinations no run can be in
    pub fn from_parts(phase: Phase, stage: Stage) -> Option<Self> {
        match (phase, stage) {
            (Phase::Idle, Stage::NotStarted) => Some(Self::Idle),
            (Phase::Initialized, Stage::NotStarted) => Some(Self::Initialized),
            (Phase::GatheringInformation, Stage::Searching) => {
                Some(Self::GatheringInformation(GatheringStage::Searching))
            }
            (Phase::AnalyzingInformation, Stage::OrganizingData) => {
                Some(Self::AnalyzingInformation(AnalyzingStage::OrganizingData))
            }
            (Phase::GeneratingReport, Stage::CreatingDetailedReport) => {
                Some(Self::GeneratingReport(ReportStage::CreatingDetailedReport))
            }
            (Phase::GeneratingReport, stage) => ReportSection::from_stage(stage)
                .map(|section| Self::GeneratingReport(ReportStage::Section(section))),
            (Phase::Completed, Stage::ReportComplete) => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Number of phase steps from `self` to `later`
    pub fn phase_distance(&self, later: &Progression) -> isize {
        later.phase().ordinal() as isize - self.phase().ordinal() as isize
    }
}

/// A source found by the search collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Unique within a run
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl Source {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            snippet: snippet.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Status {
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Research {
    pub query: String,
    pub sources_found: usize,
    pub sources: Vec<Source>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Processing {
    pub progress: f64,
    pub report: Option<String>,
    pub completed: bool,
    #[serde(rename = "inProgress")]
    pub in_progress: bool,
}

/// Display hints echoed to the client; nothing in the pipeline reads them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHints {
    pub show_sources: bool,
    pub show_progress: bool,
    pub active_tab: String,
}

impl Default for UiHints {
    fn default() -> Self {
        Self {
            show_sources: false,
            show_progress: true,
            active_tab: "chat".to_string(),
        }
    }
}

/// The complete state of one research run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "WireRunState", try_from = "WireRunState")]
pub struct RunState {
    pub progression: Progression,
    pub status: Status,
    pub research: Research,
    pub processing: Processing,
    pub ui: UiHints,
}

impl RunState {
    /// Zero state for a new run
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            research: Research {
                query: query.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn phase(&self) -> Phase {
        self.progression.phase()
    }

    pub fn stage(&self) -> Stage {
        self.progression.stage()
    }

    /// Serialize to the wire representation used in snapshots and deltas
    pub fn to_value(&self) -> Result<Value, StateInvariantViolation> {
        serde_json::to_value(self)
            .map_err(|e| StateInvariantViolation::new("state", format!("not serializable: {e}")))
    }

    /// Check the invariants that hold for any single state
    pub fn validate(&self) -> Result<(), StateInvariantViolation> {
        if self.research.query.trim().is_empty() {
            return Err(StateInvariantViolation::new(
                "research.query",
                "query must not be empty",
            ));
        }

        let progress = self.processing.progress;
        if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
            return Err(StateInvariantViolation::new(
                "processing.progress",
                format!("{progress} is outside [0, 1]"),
            ));
        }
        if progress >= 1.0 && !self.progression.is_terminal() {
            return Err(StateInvariantViolation::new(
                "processing.progress",
                "progress reaches 1.0 only at completion",
            ));
        }

        if self.research.sources_found != self.research.sources.len() {
            return Err(StateInvariantViolation::new(
                "research.sources_found",
                format!(
                    "{} does not match {} sources",
                    self.research.sources_found,
                    self.research.sources.len()
                ),
            ));
        }

        let mut ids = HashSet::new();
        for source in &self.research.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(StateInvariantViolation::new(
                    "research.sources",
                    format!("duplicate source id {:?}", source.id),
                ));
            }
        }

        if self.progression.is_terminal() {
            if !self.processing.completed {
                return Err(StateInvariantViolation::new(
                    "research.stage",
                    "report_complete requires processing.completed",
                ));
            }
            if progress != 1.0 {
                return Err(StateInvariantViolation::new(
                    "processing.progress",
                    "a completed run must report progress 1.0",
                ));
            }
        } else if self.processing.completed {
            return Err(StateInvariantViolation::new(
                "processing.completed",
                "processing completes only together with report_complete",
            ));
        }

        Ok(())
    }

    /// Format the source list for citations
    pub fn format_sources(&self) -> String {
        self.research
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}: {}", i + 1, s.title, s.url))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// Wire representation. Every key is always present so a delta can only ever
// replace paths the client already holds.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRunState {
    status: WireStatus,
    research: WireResearch,
    processing: Processing,
    ui: UiHints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireStatus {
    phase: Phase,
    error: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResearch {
    query: String,
    stage: Stage,
    sources_found: usize,
    sources: Vec<Source>,
    completed: bool,
}

impl From<RunState> for WireRunState {
    fn from(state: RunState) -> Self {
        Self {
            status: WireStatus {
                phase: state.progression.phase(),
                error: state.status.error,
                timestamp: state.status.timestamp,
            },
            research: WireResearch {
                query: state.research.query,
                stage: state.progression.stage(),
                sources_found: state.research.sources_found,
                sources: state.research.sources,
                completed: state.research.completed,
            },
            processing: state.processing,
            ui: state.ui,
        }
    }
}

impl TryFrom<WireRunState> for RunState {
    type Error = String;

    fn try_from(wire: WireRunState) -> Result<Self, Self::Error> {
        let progression = Progression::from_parts(wire.status.phase, wire.research.stage)
            .ok_or_else(|| {
                format!(
                    "stage {:?} is not valid during phase {}",
                    wire.research.stage,
                    wire.status.phase.as_str()
                )
            })?;

        Ok(Self {
            progression,
            status: Status {
                error: wire.status.error,
                timestamp: wire.status.timestamp,
            },
            research: Research {
                query: wire.research.query,
                sources_found: wire.research.sources_found,
                sources: wire.research.sources,
                completed: wire.research.completed,
            },
            processing: wire.processing,
            ui: wire.ui,
        })
    }
}
