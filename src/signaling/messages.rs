//! JSON bodies of the offer/answer exchange.

use serde::{Deserialize, Serialize};

use crate::peer::{SdpType, SessionDescription};

/// Offer sent to the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Ask the server to send a debug video track back
    pub use_debug_video: bool,
}

impl SignalingRequest {
    pub fn new(offer: &SessionDescription, use_debug_video: bool) -> Self {
        Self {
            sdp: offer.sdp().to_string(),
            sdp_type: offer.sdp_type(),
            use_debug_video,
        }
    }
}

/// Answer returned by the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Identifier the server assigned to this client
    #[serde(rename = "id")]
    pub assigned_id: String,
}
