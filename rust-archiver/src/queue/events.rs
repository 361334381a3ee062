//! Job lifecycle events.
//!
//! Published by the job store and the worker for consumption by whatever
//! transport sits in front of the archiver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{JobOrigin, JobStatus};

/// Events emitted while jobs move through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job was added to the queue.
    Queued {
        job_id: String,
        url: String,
        media_id: Option<String>,
        origin: JobOrigin,
        timestamp: DateTime<Utc>,
    },
    /// The worker picked a job up.
    Started {
        job_id: String,
        url: String,
        timestamp: DateTime<Utc>,
    },
    /// Cancellation of the running job was requested.
    CancelRequested {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job reached a terminal status.
    Finished {
        job_id: String,
        status: JobStatus,
        media_id: Option<String>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The queue was paused or resumed.
    PauseChanged {
        paused: bool,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Job this event refers to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Queued { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::CancelRequested { job_id, .. }
            | Self::Finished { job_id, .. } => Some(job_id),
            Self::PauseChanged { .. } => None,
        }
    }
}

/// Broadcaster for job events.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
