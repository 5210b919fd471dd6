//! Server-Sent Events framing for AG-UI events

use bytes::Bytes;
use thiserror::Error;

use super::events::Event;

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("serialize {event_type} failed: {source}")]
    Serialize {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Encodes each event as one `data: <json>\n\n` frame
#[derive(Debug, Clone, Copy, Default)]
pub struct EventEncoder;

impl EventEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn content_type(&self) -> &'static str {
        SSE_CONTENT_TYPE
    }

    pub fn encode(&self, event: &Event) -> Result<Bytes, EncodeError> {
        let json = serde_json::to_string(event).map_err(|source| {
            tracing::warn!(error = %source, event_type = event.event_type(), "failed to serialize SSE protocol event");
            EncodeError::Serialize {
                event_type: event.event_type(),
                source,
            }
        })?;
        Ok(Bytes::from(format!("data: {json}\n\n")))
    }
}

/// Split an SSE body back into the JSON payloads of its `data:` frames
pub fn decode_frames(body: &str) -> Vec<&str> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .collect()
}
