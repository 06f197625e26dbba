//! Session descriptions exchanged during offer/answer.

use std::fmt;

use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{ClientError, Result};

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// An immutable session description (type + SDP text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Convert to the engine's representation, parsing the SDP.
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let desc = match self.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        Ok(desc?)
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = ClientError;

    fn try_from(desc: RTCSessionDescription) -> Result<Self> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(ClientError::InvalidAnswer(format!(
                    "unsupported session description type {}",
                    other
                )))
            }
        };
        Ok(Self {
            sdp_type,
            sdp: desc.sdp,
        })
    }
}
