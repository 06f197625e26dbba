//! Video client orchestration.
//!
//! Flow:
//! 1. Load config and pick the source (file beats capture device)
//! 2. Open the source and wrap it as an outbound track through the relay
//! 3. Create the peer connection and register the session observer
//! 4. Negotiate once with the signaling server
//! 5. Wait for Ctrl-C, SIGTERM or a quit from the debug display
//! 6. Close the connection, stop the relay and the source

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::signal;
use tokio::sync::Notify;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::error::Result;
use crate::ice::IceServerConfig;
use crate::media::{
    DisplayFactory, DisplayOutcome, DisplaySink, FfplayDisplay, MediaPlayer, MediaRelay,
    VideoSource, DEBUG_WINDOW_TITLE,
};
use crate::peer::{ConnectionObserver, InboundTrack, PeerSession, WebRtcConnection};
use crate::signaling::negotiate;

/// Command-line options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub config_path: PathBuf,
    /// Ask the server for a debug video track and display it
    pub debug: bool,
    /// Stream this file instead of the capture device
    pub file: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            debug: false,
            file: None,
        }
    }
}

/// An opened source and the track fed from it
pub struct OutboundTrack {
    pub player: MediaPlayer,
    pub track: Arc<TrackLocalStaticSample>,
}

/// Open `source` and subscribe a new outbound track to it.
pub async fn create_outbound_track(source: VideoSource, relay: &MediaRelay) -> Result<OutboundTrack> {
    let player = MediaPlayer::open(source).await?;
    let track = relay.subscribe(&player);
    Ok(OutboundTrack { player, track })
}

/// Create the peer connection carrying `track`.
///
/// With `accept_inbound_debug_track` the transceiver is sendrecv, otherwise sendonly.
pub async fn create_connection(
    track: Arc<TrackLocalStaticSample>,
    accept_inbound_debug_track: bool,
    ice_servers: &[IceServerConfig],
) -> Result<Arc<WebRtcConnection>> {
    let connection = WebRtcConnection::new(track, accept_inbound_debug_track, ice_servers).await?;
    Ok(Arc::new(connection))
}

/// Reacts to connection events on behalf of the client
pub struct SessionObserver {
    connection: Arc<dyn PeerSession>,
    accept_inbound: bool,
    relay: Arc<MediaRelay>,
    display: Arc<dyn DisplayFactory>,
    shutdown: Arc<Notify>,
    display_created: AtomicBool,
}

impl SessionObserver {
    pub fn new(
        connection: Arc<dyn PeerSession>,
        accept_inbound: bool,
        relay: Arc<MediaRelay>,
        display: Arc<dyn DisplayFactory>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            connection,
            accept_inbound,
            relay,
            display,
            shutdown,
            display_created: AtomicBool::new(false),
        }
    }

    /// Whether a display sink has been created
    pub fn has_display(&self) -> bool {
        self.display_created.load(Ordering::SeqCst)
    }

    fn start_display(&self, track: InboundTrack) {
        // At most one surface per process
        if self.display_created.swap(true, Ordering::SeqCst) {
            log::debug!("Debug display already open, ignoring {} track", track.mime_type);
            return;
        }

        let renderer = match self.display.open(DEBUG_WINDOW_TITLE) {
            Ok(renderer) => renderer,
            Err(e) => {
                log::error!("Failed to open debug display: {}", e);
                return;
            }
        };

        let frames = self.relay.subscribe_remote(track);
        let connection = self.connection.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if DisplaySink::new(renderer).run(frames).await == DisplayOutcome::Quit {
                log::info!("Closing video connection...");
                if let Err(e) = connection.close().await {
                    log::warn!("Failed to close connection: {}", e);
                }
                shutdown.notify_one();
            }
        });
    }
}

#[async_trait]
impl ConnectionObserver for SessionObserver {
    async fn on_connection_state_change(&self, state: RTCPeerConnectionState) {
        log::info!("Connection state is {}", state);

        if state == RTCPeerConnectionState::Failed {
            // close() must not run inside the engine's state callback
            let connection = self.connection.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.close().await {
                    log::warn!("Failed to close connection: {}", e);
                }
            });
        }
    }

    async fn on_track(&self, track: InboundTrack) {
        log::info!("Track {} received", track.mime_type);

        if track.kind != RTPCodecType::Video {
            return;
        }
        if !self.accept_inbound {
            log::debug!("Inbound video not requested, ignoring track");
            return;
        }

        self.start_display(track);
    }
}

/// Run the client until shutdown.
pub async fn run(options: ClientOptions) -> Result<()> {
    let config = Config::load(&options.config_path)?;
    let source = VideoSource::select(&config.video, options.file.clone());

    let relay = Arc::new(MediaRelay::new());
    let shutdown = Arc::new(Notify::new());

    // Create outbound track
    let outbound = create_outbound_track(source, &relay).await?;

    // Create connection
    let connection = create_connection(
        outbound.track.clone(),
        options.debug,
        &config.webrtc.ice_servers,
    )
    .await?;

    let observer = Arc::new(SessionObserver::new(
        connection.clone(),
        options.debug,
        relay.clone(),
        Arc::new(FfplayDisplay),
        shutdown.clone(),
    ));
    let events: Arc<dyn ConnectionObserver> = observer.clone();
    connection.register(&events);

    // Negotiate
    let assigned_id = negotiate(connection.as_ref(), &config.video_server.url, options.debug).await?;
    log::info!("Video session established, assigned id {}", assigned_id);

    wait_for_shutdown(&shutdown).await;

    log::info!("Shutting down...");
    if let Err(e) = connection.close().await {
        log::warn!("Failed to close connection: {}", e);
    }
    relay.stop();
    outbound.player.close().await;

    Ok(())
}

/// Wait for SIGINT, SIGTERM or a quit request.
async fn wait_for_shutdown(shutdown: &Notify) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.notified() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::media::{FrameRenderer, RenderControl};
    use crate::peer::TrackFeed;
    use crate::testing::FakePeer;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use crate::media::Frame;
    use tokio::sync::broadcast;

    /// What the test window does with the first frame
    #[derive(Clone, Copy)]
    enum Window {
        Show,
        Quit,
        Crash,
    }

    struct TestRenderer {
        window: Window,
    }

    #[async_trait]
    impl FrameRenderer for TestRenderer {
        async fn render(&mut self, _frame: &Frame) -> Result<RenderControl> {
            match self.window {
                Window::Show => Ok(RenderControl::Continue),
                Window::Quit => Ok(RenderControl::Quit),
                Window::Crash => Err(ClientError::Display("window crashed".to_string())),
            }
        }

        async fn destroy(&mut self) {}
    }

    /// Counts opened surfaces
    struct CountingDisplay {
        opened: AtomicUsize,
        window: Window,
    }

    impl CountingDisplay {
        fn new(window: Window) -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                window,
            })
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    impl DisplayFactory for CountingDisplay {
        fn open(&self, _title: &str) -> Result<Box<dyn FrameRenderer>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestRenderer {
                window: self.window,
            }))
        }
    }

    struct Harness {
        peer: Arc<FakePeer>,
        display: Arc<CountingDisplay>,
        relay: Arc<MediaRelay>,
        shutdown: Arc<Notify>,
        observer: SessionObserver,
    }

    fn harness(accept_inbound: bool, window: Window) -> Harness {
        let peer = Arc::new(FakePeer::default());
        let display = CountingDisplay::new(window);
        let relay = Arc::new(MediaRelay::new());
        let shutdown = Arc::new(Notify::new());
        let observer = SessionObserver::new(
            peer.clone(),
            accept_inbound,
            relay.clone(),
            display.clone(),
            shutdown.clone(),
        );
        Harness {
            peer,
            display,
            relay,
            shutdown,
            observer,
        }
    }

    fn inbound(kind: RTPCodecType, frames: broadcast::Receiver<Frame>) -> InboundTrack {
        InboundTrack {
            kind,
            mime_type: "video/H264".to_string(),
            feed: TrackFeed::Frames(frames),
        }
    }

    fn idr_frame() -> Frame {
        Frame::new(
            Bytes::from_static(&[0, 0, 0, 1, 0x65]),
            Duration::from_millis(33),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_inbound_video_ignored_without_debug() {
        let h = harness(false, Window::Show);
        let (_tx, rx) = broadcast::channel(8);

        h.observer.on_track(inbound(RTPCodecType::Video, rx)).await;

        assert_eq!(h.display.opened(), 0);
        assert!(!h.observer.has_display());
        assert_eq!(h.relay.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_single_display_for_inbound_video() {
        let h = harness(true, Window::Show);
        let (_tx, rx) = broadcast::channel(8);

        h.observer.on_track(inbound(RTPCodecType::Video, rx.resubscribe())).await;
        h.observer.on_track(inbound(RTPCodecType::Video, rx)).await;

        assert_eq!(h.display.opened(), 1);
        assert!(h.observer.has_display());
    }

    #[tokio::test]
    async fn test_non_video_track_ignored() {
        let h = harness(true, Window::Show);
        let (_tx, rx) = broadcast::channel(8);

        h.observer.on_track(inbound(RTPCodecType::Audio, rx)).await;

        assert_eq!(h.display.opened(), 0);
    }

    #[tokio::test]
    async fn test_failed_state_closes_connection() {
        let h = harness(false, Window::Show);

        h.observer
            .on_connection_state_change(RTCPeerConnectionState::Failed)
            .await;
        settle().await;

        assert!(h.peer.is_closed());
    }

    #[tokio::test]
    async fn test_connected_state_keeps_connection() {
        let h = harness(false, Window::Show);

        h.observer
            .on_connection_state_change(RTCPeerConnectionState::Connected)
            .await;
        settle().await;

        assert!(!h.peer.is_closed());
    }

    #[tokio::test]
    async fn test_display_quit_closes_and_shuts_down() {
        let h = harness(true, Window::Quit);
        let (tx, rx) = broadcast::channel(8);
        tx.send(idr_frame()).unwrap();

        h.observer.on_track(inbound(RTPCodecType::Video, rx)).await;

        tokio::time::timeout(Duration::from_secs(1), h.shutdown.notified())
            .await
            .expect("shutdown not requested");
        assert!(h.peer.is_closed());
        assert_eq!(h.peer.effective_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_display_failure_keeps_streaming() {
        let h = harness(true, Window::Crash);
        let (tx, rx) = broadcast::channel(8);
        tx.send(idr_frame()).unwrap();

        h.observer.on_track(inbound(RTPCodecType::Video, rx)).await;
        settle().await;

        let shutdown = tokio::time::timeout(Duration::from_millis(100), h.shutdown.notified()).await;
        assert!(shutdown.is_err());
        assert!(!h.peer.is_closed());
        assert!(h.observer.has_display());
    }

    #[tokio::test]
    async fn test_missing_file_source_unavailable() {
        let relay = MediaRelay::new();
        let source = VideoSource::File {
            path: PathBuf::from("/nonexistent/clip.mp4"),
            image_size: crate::config::ImageSize::new(640, 480),
            frame_rate: 30,
        };

        let err = create_outbound_track(source, &relay).await.err().unwrap();

        assert!(matches!(err, ClientError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_config_fails_before_opening_source() {
        let options = ClientOptions {
            config_path: PathBuf::from("/nonexistent/config.toml"),
            ..Default::default()
        };

        let err = run(options).await.unwrap_err();

        assert!(matches!(err, ClientError::Config(_)));
    }
}
