//! In-flight media id tracking.
//!
//! Closes the window between "a job for X was enqueued" and "X landed in the
//! ledger": while a monitor-discovered job is queued or running, its media
//! id lives here and further discoveries of X are skipped.

use dashmap::DashSet;
use tracing::trace;

/// Memory-only set of media ids with a queued or running job.
#[derive(Debug, Default)]
pub struct InflightTracker {
    ids: DashSet<String>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `media_id` in flight unless it already is.
    ///
    /// The check and the insert are one atomic step, so of two concurrent
    /// callers exactly one gets `true`.
    pub fn try_add(&self, media_id: &str) -> bool {
        let added = self.ids.insert(media_id.to_string());
        trace!(media_id = %media_id, added, "Inflight add");
        added
    }

    /// Mark `media_id` in flight.
    pub fn add(&self, media_id: &str) {
        self.try_add(media_id);
    }

    /// Clear `media_id`. Returns whether it was present.
    pub fn remove(&self, media_id: &str) -> bool {
        let removed = self.ids.remove(media_id).is_some();
        trace!(media_id = %media_id, removed, "Inflight remove");
        removed
    }

    pub fn contains(&self, media_id: &str) -> bool {
        self.ids.contains(media_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
