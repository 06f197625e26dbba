//! Peer connection management for WebRTC.
//!
//! Handles the RTCPeerConnection lifecycle and the observer seam through which
//! connection events reach the client.

pub mod connection;
pub mod description;

pub use connection::*;
pub use description::*;
