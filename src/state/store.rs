//! Authoritative run state with validated, atomic mutations

use serde_json::Value;
use tracing::debug;

use super::delta::StateDelta;
use super::model::RunState;
use crate::error::StateInvariantViolation;

/// What the client needs to catch up with the current state
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// Full state; sent first and after every resync
    Snapshot(Value),
    /// Changes since the last emission; may be empty
    Delta(StateDelta),
}

/// Owns the [`RunState`] of one run.
///
/// Every mutation goes through [`StateStore::apply`], which works on a copy
/// and only commits it when all invariants still hold.
#[derive(Debug)]
pub struct StateStore {
    state: RunState,
    /// The document the client holds, or `None` before the first snapshot
    last_emitted: Option<Value>,
}

impl StateStore {
    /// Start a new run at the zero state for `query`
    pub fn initialize(query: impl Into<String>) -> Result<Self, StateInvariantViolation> {
        let state = RunState::new(query);
        state.validate()?;
        Ok(Self {
            state,
            last_emitted: None,
        })
    }

    /// Continue from a state supplied by the client. The first emission is a
    /// snapshot of it.
    pub fn resume(state: RunState) -> Result<Self, StateInvariantViolation> {
        state.validate()?;
        Ok(Self {
            state,
            last_emitted: None,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// The wire form of the current state
    pub fn snapshot(&self) -> Result<Value, StateInvariantViolation> {
        self.state.to_value()
    }

    /// Apply `mutate` atomically. A rejected mutation leaves the state untouched.
    pub fn apply<F>(&mut self, mutate: F) -> Result<(), StateInvariantViolation>
    where
        F: FnOnce(&mut RunState),
    {
        let mut next = self.state.clone();
        mutate(&mut next);
        next.validate()?;
        check_transition(&self.state, &next)?;
        self.state = next;
        Ok(())
    }

    /// Produce the snapshot or delta that brings the client up to date
    pub fn emit(&mut self) -> Result<Emission, StateInvariantViolation> {
        let current = self.state.to_value()?;
        let emission = match self.last_emitted.take() {
            None => Emission::Snapshot(current.clone()),
            Some(previous) => Emission::Delta(StateDelta::diff(&previous, &current)),
        };
        self.last_emitted = Some(current);
        Ok(emission)
    }

    /// Make the next emission a full snapshot
    pub fn resync(&mut self) {
        debug!("State resync requested");
        self.last_emitted = None;
    }
}

/// Invariants between two consecutive committed states
fn check_transition(prev: &RunState, next: &RunState) -> Result<(), StateInvariantViolation> {
    if prev.status.error.is_some() && prev != next {
        return Err(StateInvariantViolation::new(
            "status.error",
            "a failed run accepts no further changes",
        ));
    }

    if next.research.query != prev.research.query {
        return Err(StateInvariantViolation::new(
            "research.query",
            "query is immutable for the life of a run",
        ));
    }

    if next.progression < prev.progression {
        return Err(StateInvariantViolation::new(
            "status.phase",
            format!(
                "cannot move back from {}/{:?} to {}/{:?}",
                prev.phase().as_str(),
                prev.stage(),
                next.phase().as_str(),
                next.stage()
            ),
        ));
    }
    if prev.progression.phase_distance(&next.progression) > 1 {
        return Err(StateInvariantViolation::new(
            "status.phase",
            format!(
                "cannot skip from {} to {}",
                prev.phase().as_str(),
                next.phase().as_str()
            ),
        ));
    }

    if next.processing.progress < prev.processing.progress {
        return Err(StateInvariantViolation::new(
            "processing.progress",
            format!(
                "progress cannot decrease from {} to {}",
                prev.processing.progress, next.processing.progress
            ),
        ));
    }

    if !next.research.sources.starts_with(&prev.research.sources) {
        return Err(StateInvariantViolation::new(
            "research.sources",
            "sources are append-only",
        ));
    }

    Ok(())
}
