//! Error taxonomy for a research run
//!
//! Every failure a run can hit is one of four kinds:
//! - [`ResearchError::Validation`]: the request was bad, the run never starts
//! - [`ResearchError::Collaborator`]: search or report generation failed
//! - [`ResearchError::StateInvariant`]: a state transition broke an invariant
//! - [`ResearchError::Cancelled`]: the client went away or asked to stop
//!
//! Only the first three end a stream with `RUN_ERROR`; cancellation ends it
//! with a stopped `RUN_FINISHED`.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which external capability failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Search,
    ReportGeneration,
}

impl Collaborator {
    fn as_str(&self) -> &'static str {
        match self {
            Collaborator::Search => "search",
            Collaborator::ReportGeneration => "report generation",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether re-invoking the collaborator could plausibly succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network errors, timeouts, rate limits, upstream 5xx
    Transient,
    /// Bad input, authentication, content policy, unparseable responses
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// A failed search or report-generation call
#[derive(Debug, Clone, Error)]
#[error("{collaborator} failed ({kind}): {message}")]
pub struct CollaboratorError {
    pub collaborator: Collaborator,
    pub kind: FailureKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: Collaborator, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            kind,
            message: message.into(),
        }
    }

    pub fn search_transient(message: impl Into<String>) -> Self {
        Self::new(Collaborator::Search, FailureKind::Transient, message)
    }

    pub fn search_permanent(message: impl Into<String>) -> Self {
        Self::new(Collaborator::Search, FailureKind::Permanent, message)
    }

    pub fn report_transient(message: impl Into<String>) -> Self {
        Self::new(Collaborator::ReportGeneration, FailureKind::Transient, message)
    }

    pub fn report_permanent(message: impl Into<String>) -> Self {
        Self::new(Collaborator::ReportGeneration, FailureKind::Permanent, message)
    }

    /// The call did not finish within its budget
    pub fn timeout(collaborator: Collaborator, after: Duration) -> Self {
        Self::new(
            collaborator,
            FailureKind::Transient,
            format!("timed out after {after:?}"),
        )
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// A mutation that would have left [`RunState`](crate::state::RunState) inconsistent.
///
/// The mutation is rejected and the store keeps its previous state.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("state invariant violated at {field}: {reason}")]
pub struct StateInvariantViolation {
    pub field: &'static str,
    pub reason: String,
}

impl StateInvariantViolation {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level error for one research run
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    StateInvariant(#[from] StateInvariantViolation),

    #[error("run cancelled")]
    Cancelled,
}

impl ResearchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code carried in `RUN_ERROR`
    pub fn code(&self) -> &'static str {
        match self {
            ResearchError::Validation(_) => "VALIDATION_ERROR",
            ResearchError::Collaborator(e) => match (e.collaborator, e.kind) {
                (Collaborator::Search, FailureKind::Transient) => "SEARCH_FAILED_TRANSIENT",
                (Collaborator::Search, FailureKind::Permanent) => "SEARCH_FAILED_PERMANENT",
                (Collaborator::ReportGeneration, FailureKind::Transient) => {
                    "REPORT_FAILED_TRANSIENT"
                }
                (Collaborator::ReportGeneration, FailureKind::Permanent) => {
                    "REPORT_FAILED_PERMANENT"
                }
            },
            ResearchError::StateInvariant(_) => "STATE_INVARIANT_VIOLATION",
            ResearchError::Cancelled => "CANCELLED",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResearchError::Cancelled)
    }

    /// Defects are bugs in the state machine rather than bad input or a flaky upstream
    pub fn is_defect(&self) -> bool {
        matches!(self, ResearchError::StateInvariant(_))
    }
}
