//! Outbound video sources.
//!
//! A [`MediaPlayer`] runs `ffmpeg` against a capture device or a file and
//! publishes H.264 access units on a broadcast channel.
//!
//! Flow:
//! 1. Spawn ffmpeg with the source options, H.264 baseline Annex-B on stdout
//! 2. Read NAL units on a dedicated thread (blocking pipe)
//! 3. Group NAL units into access units, one [`Frame`] each
//! 4. Publish frames to every subscriber

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, oneshot};
use webrtc::media::io::h264_reader::{H264Reader, NalUnitType};

use super::frame::Frame;

use crate::config::{ImageSize, VideoConfig};
use crate::error::{ClientError, Result};

/// ffmpeg executable used as the capture/encode engine
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Frames buffered per subscriber before it starts lagging
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Initial H264Reader buffer size
const READER_CAPACITY: usize = 1024 * 1024;

const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Where outbound video comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// V4L2 capture device `/dev/video{index}`
    Device {
        index: u32,
        image_size: ImageSize,
        frame_rate: u32,
    },
    /// Video file, played in real time
    File {
        path: PathBuf,
        image_size: ImageSize,
        frame_rate: u32,
    },
}

impl VideoSource {
    /// Pick the source: a file path, when given, wins over the configured device.
    pub fn select(video: &VideoConfig, file: Option<PathBuf>) -> Self {
        match file {
            Some(path) => VideoSource::File {
                path,
                image_size: video.image_size,
                frame_rate: video.frame_rate,
            },
            None => VideoSource::Device {
                index: video.dev_idx,
                image_size: video.image_size,
                frame_rate: video.frame_rate,
            },
        }
    }

    pub fn image_size(&self) -> ImageSize {
        match self {
            VideoSource::Device { image_size, .. } | VideoSource::File { image_size, .. } => {
                *image_size
            }
        }
    }

    pub fn frame_rate(&self) -> u32 {
        match self {
            VideoSource::Device { frame_rate, .. } | VideoSource::File { frame_rate, .. } => {
                *frame_rate
            }
        }
    }

    /// Duration of one frame at the configured rate
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate().max(1)
    }

    /// ffmpeg command line producing H.264 Annex-B on stdout
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let size = self.image_size().to_string();
        let rate = self.frame_rate().to_string();

        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match self {
            VideoSource::Device { index, .. } => {
                args.extend([
                    "-f".to_string(),
                    "v4l2".to_string(),
                    "-video_size".to_string(),
                    size,
                    "-framerate".to_string(),
                    rate.clone(),
                    "-i".to_string(),
                    format!("/dev/video{}", index),
                ]);
            }
            VideoSource::File { path, image_size, .. } => {
                args.extend([
                    "-re".to_string(),
                    "-i".to_string(),
                    path.display().to_string(),
                    "-vf".to_string(),
                    format!("scale={}:{}", image_size.width, image_size.height),
                    "-r".to_string(),
                    rate.clone(),
                ]);
            }
        }

        // Constrained baseline, one keyframe per second, no B-frames
        args.extend(
            [
                "-an",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-pix_fmt",
                "yuv420p",
                "-g",
                rate.as_str(),
                "-bsf:v",
                "h264_mp4toannexb",
                "-f",
                "h264",
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        args
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoSource::Device { index, .. } => write!(f, "/dev/video{}", index),
            VideoSource::File { path, .. } => write!(f, "{}", path.display()),
        }
    }
}

/// Media player statistics
#[derive(Default)]
pub struct PlayerStats {
    pub nal_units: AtomicU64,
    pub access_units: AtomicU64,
    pub bytes_read: AtomicU64,
}

/// Groups H.264 NAL units into access units (one per frame).
///
/// An access unit ends when a parameter set, SEI or AUD follows slice data, or
/// when a slice with `first_mb_in_slice == 0` starts the next picture.
#[derive(Default)]
pub struct AccessUnitAssembler {
    pending: BytesMut,
    has_slice: bool,
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one NAL unit (header byte included, no start code).
    ///
    /// Returns the previous access unit once it is known to be complete.
    pub fn push(&mut self, unit_type: NalUnitType, nal: &[u8]) -> Option<Bytes> {
        let is_slice = matches!(
            unit_type,
            NalUnitType::CodedSliceNonIdr | NalUnitType::CodedSliceIdr
        );

        let starts_new = if is_slice {
            // first_mb_in_slice is ue(v); a leading 1 bit encodes 0
            self.has_slice && nal.get(1).map_or(false, |b| b & 0x80 != 0)
        } else {
            self.has_slice
        };

        let completed = if starts_new { self.flush() } else { None };

        self.pending.extend_from_slice(&ANNEX_B_START_CODE);
        self.pending.extend_from_slice(nal);
        self.has_slice |= is_slice;

        completed
    }

    /// Take whatever is buffered as a final access unit.
    pub fn flush(&mut self) -> Option<Bytes> {
        self.has_slice = false;
        if self.pending.is_empty() {
            return None;
        }
        Some(self.pending.split().freeze())
    }
}

/// Reads H.264 from a source process and publishes frames
pub struct MediaPlayer {
    source: VideoSource,
    child: Option<Child>,
    frames: broadcast::Sender<Frame>,
    reader: Option<thread::JoinHandle<()>>,
    /// Statistics
    pub stats: Arc<PlayerStats>,
}

impl MediaPlayer {
    /// Open `source` and wait until it produced its first NAL unit.
    pub async fn open(source: VideoSource) -> Result<Self> {
        if let VideoSource::File { path, .. } = &source {
            if !path.is_file() {
                return Err(ClientError::source_unavailable(&source, "no such file"));
            }
        }

        let mut child = Command::new(FFMPEG_BIN)
            .args(source.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                ClientError::source_unavailable(&source, format!("failed to start {}: {}", FFMPEG_BIN, e))
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(ClientError::source_unavailable(&source, "ffmpeg stdout not captured"));
            }
        };

        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let stats = Arc::new(PlayerStats::default());
        let (ready_tx, ready_rx) = oneshot::channel();

        // Killed on drop from here on
        let mut player = Self {
            source,
            child: Some(child),
            frames,
            reader: None,
            stats,
        };

        let reader = {
            let frames = player.frames.clone();
            let stats = player.stats.clone();
            let frame_duration = player.source.frame_duration();
            thread::Builder::new()
                .name("media-player".to_string())
                .spawn(move || read_access_units(stdout, frame_duration, frames, stats, ready_tx))
                .map_err(|e| {
                    ClientError::source_unavailable(&player.source, format!("failed to spawn reader: {}", e))
                })?
        };
        player.reader = Some(reader);

        let failure = match ready_rx.await {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(_) => Some("reader stopped before the first frame".to_string()),
        };

        if let Some(reason) = failure {
            let status = player
                .child
                .as_mut()
                .and_then(|child| child.try_wait().ok().flatten());
            let reason = match status {
                Some(status) => format!("{} (ffmpeg {})", reason, status),
                None => reason,
            };
            // The reader already ended, so reaping does not block
            player.stop();
            return Err(ClientError::source_unavailable(&player.source, reason));
        }

        log::info!("Opened video source {}", player.source);
        Ok(player)
    }

    /// Receive every access unit published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    /// Stop the source process and wait for it and the reader thread
    /// off the async runtime.
    pub async fn close(mut self) {
        let child = self.child.take();
        let reader = self.reader.take();

        let reaped = tokio::task::spawn_blocking(move || reap(child, reader)).await;
        if let Err(e) = reaped {
            log::warn!("Failed to stop video source: {}", e);
        }
    }

    /// Stop the source process and the reader thread, blocking the caller.
    pub fn stop(&mut self) {
        reap(self.child.take(), self.reader.take());
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Kill the source process if still running, then wait for it and the reader.
fn reap(child: Option<Child>, reader: Option<thread::JoinHandle<()>>) {
    if let Some(mut child) = child {
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
        }
        let _ = child.wait();
    }

    // The reader ends once the killed process closes its stdout
    if let Some(handle) = reader {
        let _ = handle.join();
    }
}

/// Reader thread body: NAL units in, access-unit frames out.
fn read_access_units<R: Read>(
    stdout: R,
    frame_duration: Duration,
    frames: broadcast::Sender<Frame>,
    stats: Arc<PlayerStats>,
    ready: oneshot::Sender<std::result::Result<(), String>>,
) {
    let mut reader = H264Reader::new(stdout, READER_CAPACITY);
    let mut assembler = AccessUnitAssembler::new();
    let mut ready = Some(ready);

    let publish = |data: Bytes| {
        stats.access_units.fetch_add(1, Ordering::Relaxed);
        // No receivers yet is fine, frames are live
        let _ = frames.send(Frame::new(data, frame_duration));
    };

    loop {
        let nal = match reader.next_nal() {
            Ok(nal) => nal,
            Err(e) => {
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(format!("no video data: {}", e)));
                    }
                    None => log::info!("Video source ended: {}", e),
                }
                break;
            }
        };

        if let Some(ready) = ready.take() {
            let _ = ready.send(Ok(()));
        }

        stats.nal_units.fetch_add(1, Ordering::Relaxed);
        stats.bytes_read.fetch_add(nal.data.len() as u64, Ordering::Relaxed);

        if let Some(access_unit) = assembler.push(nal.unit_type, &nal.data) {
            publish(access_unit);
        }
    }

    if let Some(access_unit) = assembler.flush() {
        publish(access_unit);
    }
}
