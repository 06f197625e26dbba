//! Fan-out of one physical media source to many logical consumers.
//!
//! The relay is constructed by the client and owns every forwarding task it
//! starts; stopping or dropping it ends them all.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::frame::Frame;
use super::source::MediaPlayer;
use crate::peer::{h264_codec_capability, InboundTrack, TrackFeed};

/// Stream id used for outbound tracks
pub const STREAM_ID: &str = "jwo-video-client";

/// Packets the sample builder may hold while waiting for late ones
const MAX_LATE_PACKETS: u16 = 512;

/// H.264 RTP clock
const VIDEO_CLOCK_RATE: u32 = 90000;

/// Frames buffered per consumer of a relayed remote track
const REMOTE_CHANNEL_CAPACITY: usize = 64;

/// Owns the forwarding tasks that feed relayed tracks
#[derive(Default)]
pub struct MediaRelay {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new outbound track fed from `player`.
    ///
    /// Every call yields an independent track; the source is never reopened.
    pub fn subscribe(&self, player: &MediaPlayer) -> Arc<TrackLocalStaticSample> {
        self.subscribe_frames(player.subscribe())
    }

    /// Create a new outbound track fed from a frame stream.
    pub fn subscribe_frames(
        &self,
        mut frames: broadcast::Receiver<Frame>,
    ) -> Arc<TrackLocalStaticSample> {
        let track = Arc::new(TrackLocalStaticSample::new(
            h264_codec_capability(),
            "video".to_owned(),
            STREAM_ID.to_owned(),
        ));

        let forward_track = track.clone();
        self.spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        if let Err(e) = forward_track.write_sample(&frame.to_sample()).await {
                            log::debug!("Dropped outbound sample: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Outbound track lagging, skipped {} frames", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        track
    }

    /// Relay an inbound track as depacketized H.264 frames.
    ///
    /// Further consumers can attach with `resubscribe()` on the returned receiver.
    pub fn subscribe_remote(&self, track: InboundTrack) -> broadcast::Receiver<Frame> {
        let (tx, rx) = broadcast::channel(REMOTE_CHANNEL_CAPACITY);

        match track.feed {
            TrackFeed::Remote(remote) => {
                self.spawn(read_remote_track(remote, tx));
            }
            TrackFeed::Frames(mut frames) => {
                self.spawn(async move {
                    loop {
                        match frames.recv().await {
                            Ok(frame) => {
                                let _ = tx.send(frame);
                            }
                            Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => break,
                        }
                    }
                });
            }
        }

        rx
    }

    /// Abort every forwarding task.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Number of forwarding tasks still running
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }
}

impl Drop for MediaRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read RTP from a remote track and publish complete H.264 frames.
async fn read_remote_track(track: Arc<TrackRemote>, frames: broadcast::Sender<Frame>) {
    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), VIDEO_CLOCK_RATE);

    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                builder.push(packet);
                while let Some(sample) = builder.pop() {
                    let _ = frames.send(Frame::from(sample));
                }
            }
            Err(e) => {
                log::debug!("Inbound track ended: {}", e);
                break;
            }
        }
    }
}
