//! Job entity.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::state::{JobOrigin, JobStatus};
use crate::Result;
use crate::domain::FetchParams;

/// A request to create a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// URL handed to the fetcher.
    pub url: String,
    /// Media identifier when already known (monitor-discovered jobs).
    pub media_id: Option<String>,
    pub params: FetchParams,
    pub origin: JobOrigin,
}

impl JobRequest {
    /// A manual request; the media id is resolved by the fetch.
    pub fn manual(url: impl Into<String>, params: FetchParams) -> Self {
        Self {
            url: url.into(),
            media_id: None,
            params,
            origin: JobOrigin::Manual,
        }
    }

    /// A request for an entry discovered in a monitored source.
    pub fn discovered(
        url: impl Into<String>,
        media_id: impl Into<String>,
        params: FetchParams,
        origin: JobOrigin,
    ) -> Self {
        Self {
            url: url.into(),
            media_id: Some(media_id.into()),
            params,
            origin,
        }
    }
}

/// A single fetch-and-archive job.
///
/// Jobs are owned by the job store; everything outside it works on clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: String,
    /// Source URL.
    pub url: String,
    /// Resolved media identifier.
    pub media_id: Option<String>,
    /// Requested fetch parameters.
    pub params: FetchParams,
    pub origin: JobOrigin,
    pub status: JobStatus,
    /// Last error message, set when the job failed.
    pub error: Option<String>,
    /// Media title, known after a successful fetch.
    pub title: Option<String>,
    /// Archived artifact, known after a successful fetch.
    pub output_path: Option<PathBuf>,
    /// Cooperative cancellation signal handed to the fetcher.
    #[serde(skip)]
    pub cancellation_token: CancellationToken,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job from a request.
    pub fn new(request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: request.url,
            media_id: request.media_id,
            params: request.params,
            origin: request.origin,
            status: JobStatus::Queued,
            error: None,
            title: None,
            output_path: None,
            cancellation_token: CancellationToken::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `target`, stamping the timestamps that go with it.
    pub fn transition(&mut self, target: JobStatus) -> Result<()> {
        self.status = self.status.transition_to(target)?;
        let now = Utc::now();
        self.updated_at = now;
        if target == JobStatus::Downloading {
            self.started_at = Some(now);
        }
        if target.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Seconds spent waiting in the queue, once started.
    pub fn queue_wait_secs(&self) -> Option<f64> {
        self.started_at
            .map(|started| ((started - self.created_at).num_milliseconds() as f64 / 1000.0).max(0.0))
    }
}
