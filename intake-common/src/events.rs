//! Change events and the in-process event bus
//!
//! Every committed store mutation is published as a [`ChangeEvent`]. The
//! store emits while it still holds the submission's critical section, so
//! events for one submission id leave the bus in commit order. Events for
//! different ids carry no relative ordering guarantee.

use crate::model::Submission;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// What happened to a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed change, as delivered to connected sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub submission_id: Uuid,
    pub kind: ChangeKind,
    /// Full record after the change; absent for deletions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
}

impl ChangeEvent {
    pub fn created(submission: Submission) -> Self {
        Self {
            submission_id: submission.id,
            kind: ChangeKind::Created,
            submission: Some(submission),
        }
    }

    pub fn updated(submission: Submission) -> Self {
        Self {
            submission_id: submission.id,
            kind: ChangeKind::Updated,
            submission: Some(submission),
        }
    }

    pub fn deleted(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            kind: ChangeKind::Deleted,
            submission: None,
        }
    }

    /// Revision carried by the event, if any
    pub fn revision(&self) -> Option<i64> {
        self.submission.as_ref().map(|s| s.revision)
    }
}

/// Broadcast bus for change events
///
/// Backed by `tokio::sync::broadcast`. Subscribers only see events emitted
/// after they subscribe; a subscriber that falls more than `capacity` events
/// behind observes `RecvError::Lagged` and must re-fetch current state.
///
/// ```
/// use intake_common::events::EventBus;
///
/// let bus = EventBus::new(100);
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChangeEvent,
    ) -> Result<usize, broadcast::error::SendError<ChangeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChangeEvent) {
        match self.tx.send(event) {
            Ok(n) => tracing::debug!(subscribers = n, "Change event delivered"),
            Err(_) => tracing::debug!("Change event dropped: no subscribers"),
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
