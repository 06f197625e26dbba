//! Single WebRTC peer connection.
//!
//! Wraps RTCPeerConnection from webrtc-rs behind the [`PeerSession`] trait and
//! forwards engine events to a [`ConnectionObserver`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::description::SessionDescription;
use crate::media::Frame;
use crate::error::Result;
use crate::ice::IceServerConfig;

/// Upper bound on waiting for ICE gathering before the offer is sent anyway
pub const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// fmtp line for H.264 constrained baseline, packetization mode 1
pub const H264_FMTP_LINE: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// H.264 RTP payload type offered to the server
const H264_PAYLOAD_TYPE: u8 = 102;

/// The peer-connection operations the signaling exchange needs.
///
/// Implemented by [`WebRtcConnection`] on top of webrtc-rs.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Produce a local offer.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a local description.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// The current local description, if one has been set.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply the remote peer's description.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Close the connection. Closing an already closed connection is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Where the media of an inbound track comes from
pub enum TrackFeed {
    /// RTP track delivered by the engine
    Remote(Arc<TrackRemote>),
    /// Already depacketized frames
    Frames(broadcast::Receiver<Frame>),
}

/// A track offered by the remote side
pub struct InboundTrack {
    pub kind: RTPCodecType,
    pub mime_type: String,
    pub feed: TrackFeed,
}

/// Receives connection events. Both callbacks are effect-only.
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// Connectivity state changed.
    async fn on_connection_state_change(&self, state: RTCPeerConnectionState);

    /// The remote side added a track.
    async fn on_track(&self, track: InboundTrack);
}

/// H.264 video codec parameters registered with the media engine
pub fn h264_codec_capability() -> RTCRtpCodecCapability {
    let feedback = |typ: &str, parameter: &str| RTCPFeedback {
        typ: typ.to_owned(),
        parameter: parameter.to_owned(),
    };

    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: H264_FMTP_LINE.to_owned(),
        rtcp_feedback: vec![
            feedback("goog-remb", ""),
            feedback("ccm", "fir"),
            feedback("nack", ""),
            feedback("nack", "pli"),
        ],
    }
}

/// Represents the client's single WebRTC peer connection
pub struct WebRtcConnection {
    /// The RTCPeerConnection instance
    peer_connection: Arc<RTCPeerConnection>,
    /// Whether inbound video is accepted (sendrecv) or not (sendonly)
    accepts_inbound: bool,
    /// Set once close() has run
    closed: AtomicBool,
}

impl WebRtcConnection {
    /// Create a new peer connection carrying `track`.
    ///
    /// # Arguments
    /// * `track` - Outbound video track
    /// * `accept_inbound` - Negotiate sendrecv so the server can send a debug track back
    /// * `ice_servers` - List of ICE servers for NAT traversal
    pub async fn new(
        track: Arc<TrackLocalStaticSample>,
        accept_inbound: bool,
        ice_servers: &[IceServerConfig],
    ) -> Result<Self> {
        // Media engine with H.264 only, so the answer cannot pick a codec we do not produce
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: h264_codec_capability(),
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(IceServerConfig::to_rtc_ice_server)
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let direction = if accept_inbound {
            RTCRtpTransceiverDirection::Sendrecv
        } else {
            RTCRtpTransceiverDirection::Sendonly
        };

        let transceiver = peer_connection
            .add_transceiver_from_track(
                track as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction,
                    send_encodings: vec![],
                }),
            )
            .await?;

        // Drain RTCP so interceptors (NACK, reports) keep running
        let sender = transceiver.sender().await;
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        log::debug!("Peer connection created ({})", direction);

        Ok(Self {
            peer_connection,
            accepts_inbound: accept_inbound,
            closed: AtomicBool::new(false),
        })
    }

    /// Forward state changes and inbound tracks to `observer`.
    ///
    /// Only a weak reference is kept, so the observer may own this connection.
    pub fn register(&self, observer: &Arc<dyn ConnectionObserver>) {
        let state_observer: Weak<dyn ConnectionObserver> = Arc::downgrade(observer);
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let observer = state_observer.clone();
                Box::pin(async move {
                    if let Some(observer) = observer.upgrade() {
                        observer.on_connection_state_change(state).await;
                    }
                })
            }));

        let track_observer: Weak<dyn ConnectionObserver> = Arc::downgrade(observer);
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let observer = track_observer.clone();
                Box::pin(async move {
                    if let Some(observer) = observer.upgrade() {
                        let inbound = InboundTrack {
                            kind: track.kind(),
                            mime_type: track.codec().capability.mime_type,
                            feed: TrackFeed::Remote(track),
                        };
                        observer.on_track(inbound).await;
                    }
                })
            },
        ));
    }

    /// Whether the connection was negotiated to receive video
    pub fn accepts_inbound(&self) -> bool {
        self.accepts_inbound
    }

    /// Current connectivity state
    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.peer_connection.connection_state()
    }

    /// Get the peer connection for advanced usage
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl PeerSession for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        SessionDescription::try_from(offer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        // Register before setting, gathering starts as soon as the description is applied
        let ice_complete = Arc::new(Notify::new());
        let ice_complete_clone = ice_complete.clone();
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(move |state| {
                if state == RTCIceGathererState::Complete {
                    ice_complete_clone.notify_one();
                }
                Box::pin(async {})
            }));

        self.peer_connection
            .set_local_description(desc.to_rtc()?)
            .await?;

        // The offer is posted once, without trickle ICE, so wait for candidates
        tokio::select! {
            _ = ice_complete.notified() => {
                log::debug!("ICE gathering complete");
            }
            _ = tokio::time::sleep(ICE_GATHERING_TIMEOUT) => {
                log::warn!(
                    "ICE gathering not complete after {:?}, sending offer with current candidates",
                    ICE_GATHERING_TIMEOUT
                );
            }
        }

        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.peer_connection.local_description().await?;
        SessionDescription::try_from(desc).ok()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(desc.to_rtc()?)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}
