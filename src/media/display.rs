//! Local preview of the inbound debug video.
//!
//! A [`DisplaySink`] pulls depacketized H.264 frames from the relay and hands
//! them to a [`FrameRenderer`], which owns exactly one UI surface.
//!
//! Flow:
//! 1. The observer opens a renderer through a [`DisplayFactory`] (at most once)
//! 2. The sink renders every relayed frame
//! 3. The renderer reports `Quit` when the operator closed the window
//! 4. The sink destroys the surface and reports how it ended

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::frame::Frame;
use crate::error::{ClientError, Result};

/// ffplay executable used as the preview window
pub const FFPLAY_BIN: &str = "ffplay";

/// Title of the debug preview window
pub const DEBUG_WINDOW_TITLE: &str = "Debug";

/// What the renderer wants after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderControl {
    Continue,
    /// The operator asked to quit
    Quit,
}

/// How a display sink finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayOutcome {
    /// The operator quit from the window
    Quit,
    /// The inbound track ended
    Ended,
    /// Rendering failed
    Failed,
}

/// One UI surface that shows H.264 frames
#[async_trait]
pub trait FrameRenderer: Send {
    /// Show one access unit.
    async fn render(&mut self, frame: &Frame) -> Result<RenderControl>;

    /// Tear the surface down. Called exactly once by the sink.
    async fn destroy(&mut self);
}

/// Creates UI surfaces
pub trait DisplayFactory: Send + Sync {
    fn open(&self, title: &str) -> Result<Box<dyn FrameRenderer>>;
}

/// Display statistics
#[derive(Default)]
pub struct DisplayStats {
    pub frames_rendered: AtomicU64,
    pub frames_skipped: AtomicU64,
}

/// Renders one relayed track until the operator quits or the track ends
pub struct DisplaySink {
    renderer: Box<dyn FrameRenderer>,
    /// Statistics
    pub stats: Arc<DisplayStats>,
}

impl DisplaySink {
    pub fn new(renderer: Box<dyn FrameRenderer>) -> Self {
        Self {
            renderer,
            stats: Arc::new(DisplayStats::default()),
        }
    }

    /// Render frames from `frames` and destroy the surface when done.
    pub async fn run(mut self, mut frames: broadcast::Receiver<Frame>) -> DisplayOutcome {
        let outcome = loop {
            match frames.recv().await {
                Ok(frame) => match self.renderer.render(&frame).await {
                    Ok(RenderControl::Continue) => {
                        self.stats.frames_rendered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(RenderControl::Quit) => break DisplayOutcome::Quit,
                    Err(e) => {
                        log::error!("Debug display failed: {}", e);
                        break DisplayOutcome::Failed;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    self.stats.frames_skipped.fetch_add(skipped, Ordering::Relaxed);
                    log::debug!("Debug display lagging, skipped {} frames", skipped);
                }
                Err(RecvError::Closed) => break DisplayOutcome::Ended,
            }
        };

        self.renderer.destroy().await;
        log::debug!(
            "Debug display finished ({:?}) after {} frames",
            outcome,
            self.stats.frames_rendered.load(Ordering::Relaxed)
        );
        outcome
    }
}

/// Opens preview windows backed by an `ffplay` process
#[derive(Debug, Default, Clone, Copy)]
pub struct FfplayDisplay;

impl DisplayFactory for FfplayDisplay {
    fn open(&self, title: &str) -> Result<Box<dyn FrameRenderer>> {
        Ok(Box::new(FfplayRenderer::spawn(title)?))
    }
}

/// ffplay command line: raw H.264 on stdin, minimal buffering
pub fn ffplay_args(title: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-window_title",
        title,
        "-fflags",
        "nobuffer",
        "-flags",
        "low_delay",
        "-framedrop",
        "-f",
        "h264",
        "-i",
        "pipe:0",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// One ffplay window. Pressing "q" in the window makes ffplay exit cleanly,
/// which is seen here as a closed pipe or an exited child. Any other exit is
/// a display failure.
pub struct FfplayRenderer {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfplayRenderer {
    pub fn spawn(title: &str) -> Result<Self> {
        let mut command = Command::new(FFPLAY_BIN);
        command.args(ffplay_args(title));
        let renderer = Self::launch(command)?;

        log::info!("Opened debug display \"{}\"", title);
        Ok(renderer)
    }

    /// Start `command` as the window process, frames go to its stdin.
    fn launch(mut command: Command) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::Display(format!("failed to start {}: {}", FFPLAY_BIN, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Display("ffplay stdin not captured".to_string()))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }
}

/// A clean exit is the operator closing the window.
fn exit_control(status: ExitStatus) -> Result<RenderControl> {
    if status.success() {
        Ok(RenderControl::Quit)
    } else {
        Err(ClientError::Display(format!("{} exited with {}", FFPLAY_BIN, status)))
    }
}

#[async_trait]
impl FrameRenderer for FfplayRenderer {
    async fn render(&mut self, frame: &Frame) -> Result<RenderControl> {
        if let Some(status) = self.child.try_wait()? {
            return exit_control(status);
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(RenderControl::Quit);
        };

        match stdin.write_all(&frame.data).await {
            Ok(()) => Ok(RenderControl::Continue),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.stdin.take();
                exit_control(self.child.wait().await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn destroy(&mut self) {
        // Closing stdin lets ffplay drain, the kill covers a window still open
        self.stdin.take();
        let _ = self.child.kill().await;
    }
}
