//! # AG-UI Research Agent
//!
//! A research agent that streams its work to the UI as AG-UI events.
//!
//! A run moves through a fixed pipeline (search, organize sources, write the
//! report section by section). Every step is an atomic, validated change to
//! the run state, published to the client as a JSON Patch delta over
//! Server-Sent Events.
//!
//! ## Architecture
//!
//! ```text
//! RunRequest ──► RunController ──► StageDriver ──► StateStore
//!                     │                 │
//!                     │                 ├──► SearchProvider
//!                     │                 └──► ReportGenerator
//!                     ▼
//!               EventSink ──► EventEncoder ──► SSE response
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod report;
pub mod run;
pub mod search;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{CollaboratorError, ResearchError, StateInvariantViolation};
pub use protocol::{Event, EventEncoder};
pub use run::{ResearchService, RunRequest};
pub use state::{RunState, StateStore};
