//! Encoded video frame passed between the source, the relay and the display.

use std::time::Duration;

use bytes::Bytes;
use webrtc::media::Sample;

/// One H.264 access unit in Annex-B form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    /// Presentation duration
    pub duration: Duration,
}

impl Frame {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }

    /// Build the sample handed to an outbound track.
    pub fn to_sample(&self) -> Sample {
        Sample {
            data: self.data.clone(),
            duration: self.duration,
            ..Default::default()
        }
    }
}

impl From<Sample> for Frame {
    fn from(sample: Sample) -> Self {
        Self {
            data: sample.data,
            duration: sample.duration,
        }
    }
}
