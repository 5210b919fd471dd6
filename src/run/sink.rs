//! The write side of a run's event channel

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ResearchError;
use crate::protocol::Event;

/// How long a closing event may wait for buffer space once the run is cancelled
pub const FINAL_SEND_GRACE: Duration = Duration::from_secs(1);

/// Ordered, bounded, single-writer event output.
///
/// `send` waits while the buffer is full, so a slow client slows the run down
/// instead of losing events. A closed channel means the client is gone, which
/// cancels the run. Cancellation also ends any wait for buffer space.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, cancel }, rx)
    }

    /// Send a progress event. Fails with `Cancelled` as soon as the run is
    /// cancelled, even while waiting on a full buffer.
    pub async fn send(&self, event: Event) -> Result<(), ResearchError> {
        let event_type = event.event_type();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(event_type, "Run cancelled before the event was sent");
                Err(ResearchError::Cancelled)
            }
            sent = self.tx.send(event) => sent.map_err(|_| self.closed(event_type)),
        }
    }

    /// Send an event of the closing sequence (report text, `RUN_FINISHED`,
    /// `RUN_ERROR`). Cancellation does not abort it, but once the run is
    /// cancelled a client that is not reading gets at most
    /// [`FINAL_SEND_GRACE`] before the event is dropped.
    pub async fn send_final(&self, event: Event) -> Result<(), ResearchError> {
        let event_type = event.event_type();
        let permit = tokio::select! {
            permit = self.tx.reserve() => permit,
            _ = self.cancel.cancelled() => {
                match tokio::time::timeout(FINAL_SEND_GRACE, self.tx.reserve()).await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(event_type, "Client is not reading, dropping closing event");
                        return Err(ResearchError::Cancelled);
                    }
                }
            }
        };
        permit.map_err(|_| self.closed(event_type))?.send(event);
        Ok(())
    }

    fn closed(&self, event_type: &'static str) -> ResearchError {
        debug!(event_type, "Event receiver dropped, cancelling run");
        self.cancel.cancel();
        ResearchError::Cancelled
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
