//! Job state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Job lifecycle states.
///
/// `Downloading` and `Canceling` only exist while a job is the worker's
/// current job; every other state is stable across dequeue cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Being fetched by the worker.
    Downloading,
    /// Cancellation requested, waiting for the fetcher to notice.
    Canceling,
    /// Fetched and archived.
    Completed,
    /// The fetcher reported an error.
    Failed,
    /// The fetcher stopped after a cancellation request.
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Canceling => "canceling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "downloading" => Some(Self::Downloading),
            "canceling" => Some(Self::Canceling),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether the job is the worker's current job.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Canceling)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Queued, Downloading) => true,
            (Downloading, Completed | Failed | Canceled | Canceling) => true,
            // A fetch may still finish (or fail) after a cancel was requested.
            (Canceling, Canceled | Completed | Failed) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: JobStatus) -> Result<JobStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOrigin {
    /// Requested through the control surface.
    #[default]
    Manual,
    /// Discovered in a monitored playlist.
    Playlist,
    /// Discovered in a monitored channel.
    Channel,
}

impl JobOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Playlist => "playlist",
            Self::Channel => "channel",
        }
    }
}

impl std::fmt::Display for JobOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
