//! Process configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::domain::{Codec, FetchParams, Resolution};
use crate::fetcher::YtDlpConfig;
use crate::monitor::SourceMonitorConfig;
use crate::queue::WorkerConfig;

/// Archiver configuration.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub download_dir: PathBuf,
    /// Ledger file; `<download_dir>/archive_ledger.json` when unset.
    pub ledger_path: Option<PathBuf>,
    pub playlists_file: PathBuf,
    pub channels_file: PathBuf,
    pub monitor_enabled: bool,
    pub monitor_interval: Duration,
    pub monitor_startup_delay: Duration,
    pub channel_recent_limit: usize,
    pub monitor_listing_timeout: Duration,
    pub default_resolution: Resolution,
    pub default_codec: Codec,
    pub worker_poll_interval: Duration,
    pub log_dir: String,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            ledger_path: None,
            playlists_file: PathBuf::from("playlists.txt"),
            channels_file: PathBuf::from("channels.txt"),
            monitor_enabled: true,
            monitor_interval: Duration::from_secs(900),
            monitor_startup_delay: Duration::from_secs(5),
            channel_recent_limit: 10,
            monitor_listing_timeout: Duration::from_secs(300),
            default_resolution: Resolution::default(),
            default_codec: Codec::default(),
            worker_poll_interval: Duration::from_secs(1),
            log_dir: "logs".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl ArchiverConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Invalid values are logged and
    /// ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("ARCHIVER_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("ARCHIVER_LEDGER_PATH") {
            config.ledger_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("ARCHIVER_PLAYLISTS_FILE") {
            config.playlists_file = PathBuf::from(path);
        }
        if let Some(path) = get("ARCHIVER_CHANNELS_FILE") {
            config.channels_file = PathBuf::from(path);
        }
        if let Some(enabled) = parse_var::<bool>(&get, "ARCHIVER_MONITOR_ENABLED") {
            config.monitor_enabled = enabled;
        }
        if let Some(secs) = parse_var::<u64>(&get, "ARCHIVER_MONITOR_INTERVAL_SECS") {
            if secs == 0 {
                warn!("ARCHIVER_MONITOR_INTERVAL_SECS must be positive, using default");
            } else {
                config.monitor_interval = Duration::from_secs(secs);
            }
        }
        if let Some(limit) = parse_var::<usize>(&get, "ARCHIVER_CHANNEL_RECENT_LIMIT") {
            config.channel_recent_limit = limit;
        }
        if let Some(secs) = parse_var::<u64>(&get, "ARCHIVER_MONITOR_LISTING_TIMEOUT_SECS") {
            if secs == 0 {
                warn!("ARCHIVER_MONITOR_LISTING_TIMEOUT_SECS must be positive, using default");
            } else {
                config.monitor_listing_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(resolution) = parse_var::<Resolution>(&get, "ARCHIVER_DEFAULT_RESOLUTION") {
            config.default_resolution = resolution;
        }
        if let Some(codec) = parse_var::<Codec>(&get, "ARCHIVER_DEFAULT_CODEC") {
            config.default_codec = codec;
        }
        if let Some(dir) = get("ARCHIVER_LOG_DIR") {
            config.log_dir = dir;
        }
        if let Some(path) = get("YTDLP_PATH") {
            config.ytdlp_path = path;
        }
        if let Some(path) = get("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }

        config
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.download_dir.join("archive_ledger.json"))
    }

    /// Parameters for jobs the monitor discovers.
    pub fn default_params(&self) -> FetchParams {
        FetchParams {
            resolution: self.default_resolution,
            fps: None,
            codec: self.default_codec,
        }
    }

    pub fn monitor_config(&self) -> SourceMonitorConfig {
        SourceMonitorConfig {
            interval: self.monitor_interval,
            startup_delay: self.monitor_startup_delay,
            channel_recent_limit: self.channel_recent_limit,
            listing_timeout: self.monitor_listing_timeout,
            playlists_file: self.playlists_file.clone(),
            channels_file: self.channels_file.clone(),
            download_dir: self.download_dir.clone(),
            default_params: self.default_params(),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            idle_poll_interval: self.worker_poll_interval,
        }
    }

    pub fn ytdlp_config(&self) -> YtDlpConfig {
        YtDlpConfig {
            ytdlp_path: self.ytdlp_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            output_dir: self.download_dir.clone(),
        }
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ArchiverConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ArchiverConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("downloads").join("archive_ledger.json")
        );
        assert_eq!(config.monitor_interval, Duration::from_secs(900));
        assert_eq!(config.channel_recent_limit, 10);
        assert!(config.monitor_enabled);
        assert_eq!(config.default_params().resolution.to_string(), "1080p");
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("ARCHIVER_DOWNLOAD_DIR", "/data/archive"),
            ("ARCHIVER_MONITOR_INTERVAL_SECS", "60"),
            ("ARCHIVER_MONITOR_LISTING_TIMEOUT_SECS", "45"),
            ("ARCHIVER_MONITOR_ENABLED", "false"),
            ("ARCHIVER_DEFAULT_RESOLUTION", "720p"),
            ("ARCHIVER_DEFAULT_CODEC", "hevc"),
            ("FFMPEG_PATH", "/opt/ffmpeg"),
        ]);
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/data/archive/archive_ledger.json")
        );
        assert_eq!(config.monitor_interval, Duration::from_secs(60));
        assert_eq!(
            config.monitor_config().listing_timeout,
            Duration::from_secs(45)
        );
        assert!(!config.monitor_enabled);
        assert_eq!(config.default_params().codec, Codec::Hevc);
        assert_eq!(config.monitor_config().default_params.resolution.height(), 720);
        assert_eq!(config.ytdlp_config().ffmpeg_path, "/opt/ffmpeg");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("ARCHIVER_MONITOR_INTERVAL_SECS", "soon"),
            ("ARCHIVER_DEFAULT_CODEC", "vp9"),
            ("ARCHIVER_CHANNEL_RECENT_LIMIT", "-1"),
            ("ARCHIVER_DOWNLOAD_DIR", "   "),
        ]);
        assert_eq!(config.monitor_interval, Duration::from_secs(900));
        assert_eq!(config.default_codec, Codec::H264);
        assert_eq!(config.channel_recent_limit, 10);
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
    }
}
