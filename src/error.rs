//! Error types for the video client.

use thiserror::Error;

/// Errors that can occur while setting up or running the video session
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Video source {source_desc} unavailable: {reason}")]
    SourceUnavailable { source_desc: String, reason: String },

    #[error("Signaling server {url} unreachable")]
    SignalingUnreachable {
        url: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Signaling server {url} returned {status}: {body}")]
    SignalingRejected {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid answer from signaling server: {0}")]
    InvalidAnswer(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Display error: {0}")]
    Display(String),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub(crate) fn source_unavailable(source_desc: impl ToString, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_desc: source_desc.to_string(),
            reason: reason.to_string(),
        }
    }
}
