//! yt-dlp backed fetcher and source lister.
//!
//! A fetch runs in two steps: yt-dlp downloads the best streams at or below
//! the requested height into a job-scoped temp file, then ffmpeg re-encodes
//! that file into the final Matroska artifact. The artifact is written as
//! `<name>.part` and renamed into place only once ffmpeg succeeds.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ProcessOutcome, probe_version, run_cancellable, tokio_command};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    FetchError, FetchOutput, FetchRequest, Fetcher, FormatSummary, SourceEntry, SourceLister,
};
use crate::domain::FetchParams;
use crate::utils::filename::artifact_file_name;
use crate::utils::fs;
use crate::{Error, Result};

const FFMPEG_MISSING: &str =
    "FFmpeg is not installed. Please install FFmpeg to enable MKV conversion.";

/// Field separator for the lines yt-dlp prints for us.
const FIELD_SEP: char = '\t';

/// Upper bound for a `yt-dlp -J` format probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool locations and output directory.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub output_dir: PathBuf,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            output_dir: PathBuf::from("downloads"),
        }
    }
}

/// Fetcher that shells out to yt-dlp and ffmpeg.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: YtDlpConfig,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// yt-dlp format selector for the requested height.
    pub fn format_selector(params: &FetchParams) -> String {
        let height = params.resolution.height();
        format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
    }

    fn download_args(&self, request: &FetchRequest) -> Vec<String> {
        let template = self
            .config
            .output_dir
            .join(format!("{}.%(ext)s", request.job_id));

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-simulate".to_string(),
            "-f".to_string(),
            Self::format_selector(&request.params),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--print".to_string(),
            format!("after_move:%(id)s{FIELD_SEP}%(filepath)s{FIELD_SEP}%(title)s"),
        ];
        if self.config.ffmpeg_path != "ffmpeg" {
            args.extend(["--ffmpeg-location".to_string(), self.config.ffmpeg_path.clone()]);
        }
        args.push(request.url.clone());
        args
    }

    fn convert_args(input: &Path, output: &Path, params: &FetchParams) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            params.codec.ffmpeg_encoder().to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
        ];
        if let Some(fps) = params.fps {
            args.extend(["-r".to_string(), fps.to_string()]);
        }
        args.extend([
            "-f".to_string(),
            "matroska".to_string(),
            output.to_string_lossy().into_owned(),
        ]);
        args
    }

    async fn download(
        &self,
        request: &FetchRequest,
        token: &CancellationToken,
    ) -> std::result::Result<Downloaded, FetchError> {
        let mut cmd = tokio_command(&self.config.ytdlp_path);
        cmd.args(self.download_args(request));
        debug!(job_id = %request.job_id, url = %request.url, "Running yt-dlp");

        let outcome = run_cancellable(cmd, token).await.map_err(|e| {
            FetchError::failed(format!("Failed to start yt-dlp ({}): {e}", self.config.ytdlp_path))
        })?;

        match outcome {
            ProcessOutcome::Cancelled => Err(FetchError::Canceled),
            outcome if !outcome.success() => Err(FetchError::failed(format!(
                "yt-dlp failed: {}",
                last_line(outcome.stderr()).unwrap_or("unknown error")
            ))),
            outcome => parse_download_line(outcome.stdout()).ok_or_else(|| {
                FetchError::failed("yt-dlp did not report the downloaded file")
            }),
        }
    }

    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        params: &FetchParams,
        token: &CancellationToken,
    ) -> std::result::Result<(), FetchError> {
        let mut cmd = tokio_command(&self.config.ffmpeg_path);
        cmd.args(Self::convert_args(input, output, params));

        let outcome = run_cancellable(cmd, token)
            .await
            .map_err(|e| FetchError::failed(format!("Failed to start ffmpeg: {e}")))?;

        match outcome {
            ProcessOutcome::Cancelled => Err(FetchError::Canceled),
            outcome if !outcome.success() => Err(FetchError::failed(format!(
                "Conversion failed: {}",
                last_line(outcome.stderr()).unwrap_or("unknown error")
            ))),
            _ => Ok(()),
        }
    }

    async fn fetch_inner(
        &self,
        request: &FetchRequest,
        token: &CancellationToken,
    ) -> std::result::Result<FetchOutput, FetchError> {
        if token.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        if !self.ffmpeg_available().await {
            return Err(FetchError::failed(FFMPEG_MISSING));
        }
        fs::ensure_dir_all_with_op("creating download directory", &self.config.output_dir)
            .await
            .map_err(|e| FetchError::failed(e.to_string()))?;

        let downloaded = self.download(request, token).await?;
        if token.is_cancelled() {
            return Err(FetchError::Canceled);
        }

        let title = downloaded
            .title
            .clone()
            .unwrap_or_else(|| downloaded.media_id.clone());
        let final_path = self
            .config
            .output_dir
            .join(artifact_file_name(&title, &downloaded.media_id, "mkv"));
        let part_path = part_path_for(&final_path);

        info!(
            job_id = %request.job_id,
            media_id = %downloaded.media_id,
            codec = %request.params.codec,
            "Converting to MKV"
        );
        if let Err(e) = self
            .convert(&downloaded.path, &part_path, &request.params, token)
            .await
        {
            if let Err(remove_err) = fs::remove_file_if_exists(&part_path).await {
                warn!(
                    job_id = %request.job_id,
                    path = %part_path.display(),
                    error = %remove_err,
                    "Failed to remove partial artifact"
                );
            }
            return Err(e);
        }

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| FetchError::failed(format!("Failed to finalize artifact: {e}")))?;

        Ok(FetchOutput {
            media_id: downloaded.media_id,
            title: downloaded.title,
            output_path: Some(final_path),
        })
    }

    /// Remove every temp file yt-dlp wrote for this job.
    async fn cleanup_job_files(&self, job_id: &str) {
        let prefix = format!("{job_id}.");
        let dir = &self.config.output_dir;
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_job_file = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix));
            if is_job_file && let Err(e) = fs::remove_file_if_exists(&entry.path()).await {
                warn!(job_id = %job_id, error = %e, "Failed to remove temp file");
            }
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancellation_token: CancellationToken,
    ) -> std::result::Result<FetchOutput, FetchError> {
        let result = self.fetch_inner(request, &cancellation_token).await;
        self.cleanup_job_files(&request.job_id).await;
        result
    }

    async fn probe_formats(&self, url: &str) -> std::result::Result<FormatSummary, FetchError> {
        let mut cmd = tokio_command(&self.config.ytdlp_path);
        cmd.args(["-J", "--no-playlist", "--no-warnings", url]);
        debug!(url = %url, "Probing formats");

        // The child is killed when the timed-out future is dropped.
        let outcome = tokio::time::timeout(
            PROBE_TIMEOUT,
            run_cancellable(cmd, &CancellationToken::new()),
        )
        .await
        .map_err(|_| FetchError::failed("Format probe timed out"))?
        .map_err(|e| {
            FetchError::failed(format!("Failed to start yt-dlp ({}): {e}", self.config.ytdlp_path))
        })?;

        match outcome {
            ProcessOutcome::Cancelled => Err(FetchError::Canceled),
            outcome if !outcome.success() => Err(FetchError::failed(format!(
                "yt-dlp failed: {}",
                last_line(outcome.stderr()).unwrap_or("unknown error")
            ))),
            outcome => parse_format_summary(outcome.stdout())
                .map_err(|e| FetchError::failed(format!("Unreadable yt-dlp metadata: {e}"))),
        }
    }

    async fn ffmpeg_available(&self) -> bool {
        let path = self.config.ffmpeg_path.clone();
        tokio::task::spawn_blocking(move || probe_version(path, "-version"))
            .await
            .ok()
            .flatten()
            .is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ProbeInfo {
    title: Option<String>,
    #[serde(default)]
    formats: Vec<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    vcodec: Option<String>,
    height: Option<f64>,
    fps: Option<f64>,
}

impl ProbeFormat {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }
}

/// Summarize the JSON document printed by `yt-dlp -J`.
pub fn parse_format_summary(json: &str) -> std::result::Result<FormatSummary, serde_json::Error> {
    let info: ProbeInfo = serde_json::from_str(json)?;

    let video = || info.formats.iter().filter(|f| f.has_video());
    let heights: BTreeSet<u32> = video()
        .filter_map(|f| f.height)
        .filter(|h| *h >= 1.0)
        .map(|h| h as u32)
        .collect();
    let fps: BTreeSet<u32> = video()
        .filter_map(|f| f.fps)
        .map(|f| f as u32)
        .filter(|f| *f > 0)
        .collect();

    Ok(FormatSummary {
        original_fps: info.formats.first().and_then(|f| f.fps),
        title: info.title,
        resolutions: heights.into_iter().rev().map(|h| format!("{h}p")).collect(),
        available_fps: fps.into_iter().rev().collect(),
    })
}

/// What yt-dlp reported after moving the downloaded file into place.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Downloaded {
    media_id: String,
    path: PathBuf,
    title: Option<String>,
}

/// Parse the `id<TAB>filepath<TAB>title` line printed after the download.
fn parse_download_line(stdout: &str) -> Option<Downloaded> {
    stdout.lines().rev().find_map(|line| {
        let mut fields = line.trim_end_matches('\r').splitn(3, FIELD_SEP);
        let media_id = fields.next()?.trim();
        let path = fields.next()?.trim();
        if media_id.is_empty() || media_id == "NA" || path.is_empty() {
            return None;
        }
        let title = fields
            .next()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "NA")
            .map(str::to_string);
        Some(Downloaded {
            media_id: media_id.to_string(),
            path: PathBuf::from(path),
            title,
        })
    })
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|l| !l.is_empty())
}

/// Source lister backed by `yt-dlp --flat-playlist`.
#[derive(Debug, Clone)]
pub struct YtDlpSourceLister {
    ytdlp_path: String,
}

impl YtDlpSourceLister {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }
}

impl Default for YtDlpSourceLister {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl SourceLister for YtDlpSourceLister {
    async fn list_entries(&self, source_url: &str) -> Result<Vec<SourceEntry>> {
        let mut cmd = tokio_command(&self.ytdlp_path);
        cmd.args([
            "--flat-playlist",
            "--no-warnings",
            "--print",
            &format!("%(id)s{FIELD_SEP}%(url)s"),
            source_url,
        ]);

        let outcome = run_cancellable(cmd, &CancellationToken::new())
            .await
            .map_err(|e| Error::source_listing(source_url, format!("failed to start yt-dlp: {e}")))?;
        if !outcome.success() {
            return Err(Error::source_listing(
                source_url,
                last_line(outcome.stderr()).unwrap_or("yt-dlp exited with an error"),
            ));
        }

        Ok(parse_flat_listing(outcome.stdout()))
    }
}

/// Parse `id<TAB>url` lines from a flat playlist listing.
///
/// Entries with no usable url get a watch url built from their id; lines
/// with neither are dropped.
pub fn parse_flat_listing(stdout: &str) -> Vec<SourceEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (id, url) = line.split_once(FIELD_SEP).unwrap_or((line, ""));
            let id = Some(id.trim()).filter(|id| !id.is_empty() && *id != "NA");
            let url = url.trim();
            let url = if url.is_empty() || url == "NA" {
                format!("https://www.youtube.com/watch?v={}", id?)
            } else {
                url.to_string()
            };
            Some(SourceEntry::new(id.map(str::to_string), url))
        })
        .collect()
}
