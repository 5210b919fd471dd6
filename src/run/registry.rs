//! Cancellation handles of the runs currently streaming

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a live run. Returns false, leaving the table unchanged, when a
    /// live run already holds `run_id`.
    pub async fn register(&self, run_id: String, cancel: CancellationToken) -> bool {
        match self.runs.write().await.entry(run_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(cancel);
                true
            }
        }
    }

    /// Request a stop. Returns false when no such run is active.
    pub async fn stop(&self, run_id: &str) -> bool {
        match self.runs.read().await.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, run_id: &str) {
        self.runs.write().await.remove(run_id);
    }

    pub async fn contains(&self, run_id: &str) -> bool {
        self.runs.read().await.contains_key(run_id)
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}
