//! Progress events emitted while waiting on a resource.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::status::ResourceStatus;

/// One tick of a status wait loop.
///
/// Emitted after every status fetch that still reports a pending status,
/// right before the poller sleeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEvent {
    /// Human-readable target, e.g. `"model/default/m3f1a9"`.
    pub target: String,
    /// 1-based number of the status fetch that produced this event.
    pub attempt: u32,
    /// Status observed by that fetch.
    pub status: ResourceStatus,
    /// Server message attached to the status, if any.
    pub message: Option<String>,
    /// Time spent waiting so far.
    pub elapsed: Duration,
    /// Delay before the next fetch.
    pub next_poll_in: Duration,
}

impl PollEvent {
    /// Create a new poll event.
    pub fn new(
        target: impl Into<String>,
        attempt: u32,
        status: ResourceStatus,
        elapsed: Duration,
        next_poll_in: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            attempt,
            status,
            message: None,
            elapsed,
            next_poll_in,
        }
    }

    /// Builder method to attach the server message.
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}
