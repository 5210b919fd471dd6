//! AG-UI events emitted during a research run
//!
//! Serialized with a `type` tag in SCREAMING_SNAKE_CASE and camelCase ids,
//! the form AG-UI clients parse.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::state::StateDelta;

/// Message author role. Only the agent writes messages in this protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Assistant,
}

/// How a run ended, carried in `RUN_FINISHED.result`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Stopped => "stopped",
        }
    }

    fn to_result(self) -> Value {
        json!({ "outcome": self.as_str() })
    }
}

// ============================================================================
// AG-UI Event Types
// ============================================================================

/// The AG-UI events a research run emits.
///
/// See: <https://docs.ag-ui.com/concepts/events>
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    // ========================================================================
    // Lifecycle Events
    // ========================================================================
    /// Signals the start of a run.
    #[serde(rename = "RUN_STARTED")]
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },

    /// Signals the end of a run, either completed or stopped.
    #[serde(rename = "RUN_FINISHED")]
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// Signals that the run failed.
    #[serde(rename = "RUN_ERROR")]
    RunError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    // ========================================================================
    // State Events
    // ========================================================================
    /// Full state document.
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot { snapshot: Value },

    /// RFC 6902 operations against the last snapshot plus earlier deltas.
    #[serde(rename = "STATE_DELTA")]
    StateDelta { delta: StateDelta },

    // ========================================================================
    // Text Message Events
    // ========================================================================
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        role: Role,
    },

    #[serde(rename = "TEXT_MESSAGE_CONTENT")]
    TextMessageContent {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },

    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

impl Event {
    // ========================================================================
    // Factory Methods
    // ========================================================================

    pub fn run_started(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunStarted {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_finished(
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        outcome: RunOutcome,
    ) -> Self {
        Self::RunFinished {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            result: Some(outcome.to_result()),
        }
    }

    pub fn run_error(message: impl Into<String>, code: Option<String>) -> Self {
        Self::RunError {
            message: message.into(),
            code,
        }
    }

    pub fn state_snapshot(snapshot: Value) -> Self {
        Self::StateSnapshot { snapshot }
    }

    pub fn state_delta(delta: StateDelta) -> Self {
        Self::StateDelta { delta }
    }

    pub fn text_message_start(message_id: impl Into<String>) -> Self {
        Self::TextMessageStart {
            message_id: message_id.into(),
            role: Role::Assistant,
        }
    }

    pub fn text_message_content(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    pub fn text_message_end(message_id: impl Into<String>) -> Self {
        Self::TextMessageEnd {
            message_id: message_id.into(),
        }
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    /// The wire `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    /// The `outcome` of a `RUN_FINISHED` event
    pub fn outcome(&self) -> Option<&str> {
        match self {
            Self::RunFinished {
                result: Some(result),
                ..
            } => result.get("outcome").and_then(Value::as_str),
            _ => None,
        }
    }
}
