//! Fetcher and source-lister abstractions.
//!
//! The worker only knows the [`Fetcher`] trait and the monitor only knows
//! [`SourceLister`]; the yt-dlp backed implementations live in [`ytdlp`].

pub mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::FetchParams;
use crate::utils::url::media_id_from_url;

pub use ytdlp::{YtDlpConfig, YtDlpFetcher, YtDlpSourceLister, parse_format_summary};

/// What the worker hands to a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub job_id: String,
    pub url: String,
    /// Media id, when the job was created from a discovered entry.
    pub media_id: Option<String>,
    pub params: FetchParams,
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    /// Media id of the archived item.
    pub media_id: String,
    pub title: Option<String>,
    /// Final artifact location.
    pub output_path: Option<PathBuf>,
}

/// Why a fetch did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The cancellation token fired before the fetch finished.
    #[error("operation canceled")]
    Canceled,
    #[error("{0}")]
    Failed(String),
}

impl FetchError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Formats a url offers, as reported by a format probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatSummary {
    pub title: Option<String>,
    /// Distinct video heights as `"<height>p"`, highest first.
    pub resolutions: Vec<String>,
    /// Distinct whole frame rates of the video formats, highest first.
    pub available_fps: Vec<u32>,
    /// Frame rate of the first listed format.
    pub original_fps: Option<f64>,
}

/// Downloads one item and archives it.
///
/// Implementations must observe the cancellation token and return
/// [`FetchError::Canceled`] promptly once it fires. No partial artifact may
/// be left under the final name on failure or cancellation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancellation_token: CancellationToken,
    ) -> std::result::Result<FetchOutput, FetchError>;

    /// Inspect `url` without downloading it.
    async fn probe_formats(&self, _url: &str) -> std::result::Result<FormatSummary, FetchError> {
        Err(FetchError::failed("format probing is not supported"))
    }

    /// Whether the converter needed to produce artifacts can be run.
    async fn ffmpeg_available(&self) -> bool {
        true
    }
}

/// One entry of a playlist or channel listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub media_id: Option<String>,
    pub url: String,
}

impl SourceEntry {
    pub fn new(media_id: Option<String>, url: impl Into<String>) -> Self {
        Self {
            media_id: media_id.filter(|id| !id.trim().is_empty()),
            url: url.into(),
        }
    }

    /// The entry's media id, falling back to one parsed from its URL.
    pub fn resolve_media_id(&self) -> Option<String> {
        self.media_id
            .clone()
            .or_else(|| media_id_from_url(&self.url))
    }
}

/// Lists the entries of a playlist or channel, newest first for channels.
#[async_trait]
pub trait SourceLister: Send + Sync {
    async fn list_entries(&self, source_url: &str) -> crate::Result<Vec<SourceEntry>>;
}
