//! Run request body: a bare `{query}` or an AG-UI `RunAgentInput`

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One conversation message as sent by AG-UI clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMessage {
    pub role: String,
    /// Text content; `null` and structured content read as empty
    #[serde(default, deserialize_with = "text_content")]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

fn text_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        _ => String::new(),
    })
}

impl InputMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            id: None,
        }
    }
}

/// Input to one research run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunRequest {
    #[serde(
        rename = "threadId",
        alias = "thread_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thread_id: Option<String>,

    #[serde(
        rename = "runId",
        alias = "run_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub run_id: Option<String>,

    /// Research topic; takes precedence over `messages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<InputMessage>,

    /// State returned by an earlier run of the same research
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_ids(mut self, thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self.run_id = Some(run_id.into());
        self
    }

    /// The research query: `query` if set, otherwise the last user message.
    /// Blank input yields an empty string.
    pub fn resolved_query(&self) -> String {
        let explicit = self
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());
        let from_messages = || {
            self.messages
                .iter()
                .rev()
                .filter(|m| m.role.eq_ignore_ascii_case("user"))
                .map(|m| m.content.trim())
                .find(|text| !text.is_empty())
        };
        explicit.or_else(from_messages).unwrap_or_default().to_string()
    }
}
