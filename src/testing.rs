//! Test doubles shared by the unit tests: a scripted peer session and a
//! one-shot signaling server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::error::Result;
use crate::peer::{PeerSession, SessionDescription};

pub const FAKE_OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// Peer session that records what the signaling code does to it
#[derive(Default)]
pub struct FakePeer {
    pub offers_created: AtomicUsize,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    /// Number of close() calls that actually closed
    pub effective_closes: AtomicUsize,
    /// Make set_local_description() fail
    pub fail_set_local: AtomicBool,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(FAKE_OFFER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        if self.fail_set_local.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "gathering failed").into());
        }
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.effective_closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// What the fake signaling server saw
#[derive(Default)]
pub struct ServerLog {
    pub requests: usize,
    pub content_type: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// Serve `status` + `body` to every POST on a random local port.
///
/// Returns the offer URL and the shared request log.
pub async fn spawn_signaling_server(
    status: StatusCode,
    body: &'static str,
) -> (String, Arc<Mutex<ServerLog>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(ServerLog::default()));

    let server_log = log.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = server_log.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let log = log.clone();
                    async move {
                        let content_type = req
                            .headers()
                            .get(hyper::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let bytes = req.into_body().collect().await?.to_bytes();
                        {
                            let mut log = log.lock();
                            log.requests += 1;
                            log.content_type = content_type;
                            log.body = serde_json::from_slice(&bytes).ok();
                        }
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(status)
                                .header(hyper::header::CONTENT_TYPE, "application/json")
                                .body(Full::new(Bytes::from_static(body.as_bytes())))
                                .unwrap(),
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (format!("http://{}/offer", addr), log)
}

/// A URL on a local port with nothing listening.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/offer", addr)
}
