//! The staged research pipeline

pub mod driver;
pub mod organize;

pub use driver::{section_progress, DriverSettings, StageDriver};
pub use organize::organize_sources;
