//! AG-UI wire protocol: event types and their SSE encoding

pub mod encoder;
pub mod events;

pub use encoder::{decode_frames, EncodeError, EventEncoder, SSE_CONTENT_TYPE};
pub use events::{Event, Role, RunOutcome};
