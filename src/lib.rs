//! jwo-video-client - WebRTC video client
//!
//! Streams a V4L2 capture device or a video file to a video server:
//! - One outbound H.264 track, captured and encoded by ffmpeg
//! - A single HTTP POST offer/answer exchange (no trickle ICE, no renegotiation)
//! - Optional inbound debug video shown in an ffplay window
//!
//! Everything below the session description (ICE, DTLS-SRTP, RTP) is handled
//! by webrtc-rs.

pub mod client;
pub mod config;
pub mod error;
pub mod ice;
pub mod media;
pub mod peer;
pub mod signaling;

#[cfg(test)]
mod testing;

pub use client::{
    create_connection, create_outbound_track, run, ClientOptions, OutboundTrack, SessionObserver,
};
pub use config::Config;
pub use error::{ClientError, Result};
pub use ice::{google_stun_servers, IceServerConfig};
pub use media::{MediaPlayer, MediaRelay, VideoSource};
pub use peer::{ConnectionObserver, PeerSession, SessionDescription, WebRtcConnection};
pub use signaling::negotiate;
