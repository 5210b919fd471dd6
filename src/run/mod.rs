//! Run lifecycle: requests, the per-run controller, and the event channel

pub mod controller;
pub mod registry;
pub mod request;
pub mod service;
pub mod sink;

pub use controller::{RunController, RunSettings, RunSummary};
pub use registry::RunRegistry;
pub use request::{InputMessage, RunRequest};
pub use service::{ResearchService, RunHandle};
pub use sink::EventSink;
