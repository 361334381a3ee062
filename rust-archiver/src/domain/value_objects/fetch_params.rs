//! Fetch parameter value objects: resolution, codec and their bundle.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Target vertical resolution, written as `"<height>p"` (e.g. `"720p"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution(u32);

impl Resolution {
    /// Create a resolution from a pixel height.
    pub fn from_height(height: u32) -> Result<Self> {
        if height == 0 {
            return Err(Error::validation("Resolution height must be positive"));
        }
        Ok(Self(height))
    }

    /// Parse `"720p"` style input.
    pub fn parse(s: &str) -> Result<Self> {
        let digits = s
            .trim()
            .strip_suffix('p')
            .ok_or_else(|| Error::validation("Resolution must be in format like \"720p\""))?;
        let height = digits
            .parse::<u32>()
            .map_err(|_| Error::validation("Resolution must be in format like \"720p\""))?;
        Self::from_height(height)
    }

    pub fn height(&self) -> u32 {
        self.0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self(1080)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}p", self.0)
    }
}

impl std::str::FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Resolution {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

/// Output video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    Hevc,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "h264" => Ok(Self::H264),
            "hevc" => Ok(Self::Hevc),
            _ => Err(Error::validation(
                "Invalid codec. Supported codecs: h264, hevc",
            )),
        }
    }

    /// ffmpeg encoder used for this codec.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parameters a job is fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FetchParams {
    pub resolution: Resolution,
    /// Output frame rate; `None` keeps the source rate.
    pub fps: Option<u32>,
    pub codec: Codec,
}

impl FetchParams {
    /// Create validated fetch parameters.
    pub fn new(resolution: Resolution, fps: Option<u32>, codec: Codec) -> Result<Self> {
        if fps == Some(0) {
            return Err(Error::validation("FPS must be a positive number"));
        }
        Ok(Self {
            resolution,
            fps,
            codec,
        })
    }

    /// Parse raw control-surface input.
    pub fn parse(resolution: &str, fps: Option<u32>, codec: Option<&str>) -> Result<Self> {
        let resolution = Resolution::parse(resolution)?;
        let codec = codec.map(Codec::parse).transpose()?.unwrap_or_default();
        Self::new(resolution, fps, codec)
    }
}
