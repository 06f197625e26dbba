//! Signaling for WebRTC connection establishment.
//!
//! A single offer/answer exchange over HTTP:
//! 1. Create an SDP offer and set it as local description
//! 2. POST `{"sdp", "type", "use_debug_video"}` to the server
//! 3. Set the returned answer as remote description
//! 4. Hand the server-assigned id back to the caller
//!
//! Nothing is retried. Any failure closes the connection.

pub mod http_client;
pub mod messages;

pub use http_client::*;
pub use messages::*;

use crate::error::Result;
use crate::peer::{PeerSession, SessionDescription};

/// Run the one-shot offer/answer exchange and return the assigned id.
///
/// On success the connection has both descriptions set; ICE and DTLS continue
/// inside the engine.
pub async fn negotiate<P>(connection: &P, server_url: &str, use_debug_video: bool) -> Result<String>
where
    P: PeerSession + ?Sized,
{
    match exchange(connection, server_url, use_debug_video).await {
        Ok(assigned_id) => Ok(assigned_id),
        Err(e) => {
            if let Err(close_err) = connection.close().await {
                log::warn!("Failed to close connection after signaling error: {}", close_err);
            }
            Err(e)
        }
    }
}

async fn exchange<P>(
    connection: &P,
    server_url: &str,
    use_debug_video: bool,
) -> Result<String>
where
    P: PeerSession + ?Sized,
{
    let offer = connection.create_offer().await?;
    connection.set_local_description(offer.clone()).await?;

    // The local description carries the gathered candidates, the raw offer does not
    let local = connection.local_description().await.unwrap_or(offer);

    log::info!("Sending offer to {}", server_url);
    let request = SignalingRequest::new(&local, use_debug_video);
    let response = post_offer(server_url, &request).await?;

    connection
        .set_remote_description(SessionDescription::answer(response.sdp))
        .await?;
    log::info!("Remote answer applied");

    Ok(response.assigned_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::peer::SdpType;
    use crate::testing::{spawn_signaling_server, unreachable_url, FakePeer, FAKE_OFFER_SDP};
    use hyper::StatusCode;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_request_body_matches_offer() {
        let (url, log) =
            spawn_signaling_server(StatusCode::OK, r#"{"sdp":"A","type":"answer","id":"xyz"}"#)
                .await;
        let peer = FakePeer::default();

        negotiate(&peer, &url, true).await.unwrap();

        let log = log.lock();
        assert_eq!(log.requests, 1);
        assert_eq!(log.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            log.body,
            Some(serde_json::json!({
                "sdp": FAKE_OFFER_SDP,
                "type": "offer",
                "use_debug_video": true,
            }))
        );
    }

    #[tokio::test]
    async fn test_answer_applied_and_id_returned() {
        let (url, _log) =
            spawn_signaling_server(StatusCode::OK, r#"{"sdp":"A","type":"answer","id":"xyz"}"#)
                .await;
        let peer = FakePeer::default();

        let assigned_id = negotiate(&peer, &url, false).await.unwrap();

        assert_eq!(assigned_id, "xyz");
        assert_eq!(peer.offers_created.load(Ordering::SeqCst), 1);
        let local = peer.local.lock().clone().unwrap();
        assert_eq!(local.sdp_type(), SdpType::Offer);
        let remote = peer.remote.lock().clone().unwrap();
        assert_eq!(remote.sdp_type(), SdpType::Answer);
        assert_eq!(remote.sdp(), "A");
        assert!(!peer.is_closed());
    }

    #[tokio::test]
    async fn test_unreachable_server_closes_connection() {
        let url = unreachable_url().await;
        let peer = FakePeer::default();

        let err = negotiate(&peer, &url, false).await.unwrap_err();

        match err {
            ClientError::SignalingUnreachable { url: failed_url, .. } => assert_eq!(failed_url, url),
            other => panic!("Expected SignalingUnreachable, got {:?}", other),
        }
        assert!(peer.is_closed());
        assert!(peer.remote.lock().is_none());

        // Closing again has no further effect
        peer.close().await.unwrap();
        assert_eq!(peer.effective_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_offer_closes_connection() {
        let (url, _log) = spawn_signaling_server(StatusCode::BAD_REQUEST, "bad offer").await;
        let peer = FakePeer::default();

        let err = negotiate(&peer, &url, false).await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::SignalingRejected { status: 400, ref body, .. } if body == "bad offer"
        ));
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_local_description_failure_closes_connection() {
        let (url, log) =
            spawn_signaling_server(StatusCode::OK, r#"{"sdp":"A","type":"answer","id":"xyz"}"#)
                .await;
        let peer = FakePeer::default();
        peer.fail_set_local.store(true, Ordering::SeqCst);

        let err = negotiate(&peer, &url, false).await.unwrap_err();

        assert!(matches!(err, ClientError::Io(_)));
        assert!(peer.is_closed());
        assert_eq!(log.lock().requests, 0);
    }

    #[tokio::test]
    async fn test_answer_without_id_is_invalid() {
        let (url, _log) =
            spawn_signaling_server(StatusCode::OK, r#"{"sdp":"A","type":"answer"}"#).await;
        let peer = FakePeer::default();

        let err = negotiate(&peer, &url, false).await.unwrap_err();

        assert!(matches!(err, ClientError::InvalidAnswer(_)));
        assert!(peer.is_closed());
        assert!(peer.remote.lock().is_none());
    }
}
