//! Monitored source lists.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::JobOrigin;
use crate::utils::fs;

/// Kind of monitored source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Playlist,
    Channel,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Playlist, SourceKind::Channel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Channel => "channel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "playlist" | "playlists" => Some(Self::Playlist),
            "channel" | "channels" => Some(Self::Channel),
            _ => None,
        }
    }

    /// Origin recorded on jobs discovered in this kind of source.
    pub fn origin(&self) -> JobOrigin {
        match self {
            Self::Playlist => JobOrigin::Playlist,
            Self::Channel => JobOrigin::Channel,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One URL per line; blank lines and `#` comments are ignored.
pub fn parse_source_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a source list file. A missing file is an empty list.
pub async fn read_source_file(path: &Path) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(parse_source_list(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(fs::io_error("reading source list", path, e)),
    }
}
