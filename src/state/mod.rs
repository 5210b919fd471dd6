//! Run state: the model, its JSON Patch deltas, and the store that guards it

pub mod delta;
pub mod model;
pub mod store;

pub use delta::{DeltaError, PatchOperation, StateDelta};
pub use model::{
    AnalyzingStage, GatheringStage, Phase, Processing, Progression, ReportSection, ReportStage,
    Research, RunState, Source, Stage, Status, UiHints,
};
pub use store::{Emission, StateStore};
