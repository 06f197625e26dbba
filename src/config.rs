//! Configuration loading for the video client.
//!
//! Read once at startup from a TOML file:
//!
//! ```toml
//! [video]
//! dev_idx = 0
//! image_size = "640x480"
//! frame_rate = 30
//!
//! [video_server]
//! url = "http://localhost:8080/offer"
//! ```
//!
//! An optional `[webrtc]` table lists ICE servers. Without it the default
//! Google STUN server is used.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::ice::{google_stun_servers, IceServerConfig};

/// Default config file location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub video: VideoConfig,
    pub video_server: VideoServerConfig,
    #[serde(default)]
    pub webrtc: WebRtcConfig,
}

/// Capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Capture device index (`/dev/video{dev_idx}`)
    pub dev_idx: u32,
    /// Image size as "WIDTHxHEIGHT"
    pub image_size: ImageSize,
    /// Frames per second
    pub frame_rate: u32,
}

/// Signaling endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoServerConfig {
    pub url: String,
}

/// Peer connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: google_stun_servers(),
        }
    }
}

impl Config {
    /// Load and validate the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.video.frame_rate == 0 {
            return Err(ClientError::Config("video.frame_rate must be positive".into()));
        }

        let url = url::Url::parse(&self.video_server.url).map_err(|e| {
            ClientError::Config(format!("video_server.url '{}': {}", self.video_server.url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::Config(format!(
                "video_server.url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(())
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for ImageSize {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ClientError::Config(format!("image size '{}' is not WIDTHxHEIGHT", s));

        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;

        // H.264 4:2:0 needs even dimensions
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(ClientError::Config(format!(
                "image size '{}' must have positive even dimensions",
                s
            )));
        }

        Ok(Self { width, height })
    }
}

impl TryFrom<String> for ImageSize {
    type Error = ClientError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ImageSize> for String {
    fn from(size: ImageSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
