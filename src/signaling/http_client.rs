//! HTTP transport for the offer/answer exchange.
//!
//! One POST per process lifetime: JSON offer in the request body, JSON answer
//! in the response body. No retry.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use super::messages::{SignalingRequest, SignalingResponse};
use crate::error::{ClientError, Result};
use crate::peer::SdpType;

/// POST `offer` as JSON to `server_url` and parse the JSON answer.
pub async fn post_offer(server_url: &str, offer: &SignalingRequest) -> Result<SignalingResponse> {
    // Create HTTP client with webpki roots for TLS
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

    let body = serde_json::to_vec(offer)
        .map_err(|e| ClientError::Http(format!("Failed to encode offer: {}", e)))?;

    let request = Request::builder()
        .method(Method::POST)
        .uri(server_url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| ClientError::Http(format!("Failed to build request: {}", e)))?;

    let unreachable_err = |cause: Box<dyn std::error::Error + Send + Sync>| {
        ClientError::SignalingUnreachable {
            url: server_url.to_string(),
            cause,
        }
    };

    let response = client
        .request(request)
        .await
        .map_err(|e| unreachable_err(Box::new(e)))?;

    let status = response.status();

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|e| unreachable_err(Box::new(e)))?
        .to_bytes();

    if !status.is_success() {
        return Err(ClientError::SignalingRejected {
            url: server_url.to_string(),
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body_bytes).into_owned(),
        });
    }

    parse_answer(&body_bytes)
}

/// Parse and check an answer body.
pub fn parse_answer(body: &[u8]) -> Result<SignalingResponse> {
    let answer: SignalingResponse =
        serde_json::from_slice(body).map_err(|e| ClientError::InvalidAnswer(e.to_string()))?;

    if answer.sdp_type != SdpType::Answer {
        return Err(ClientError::InvalidAnswer(format!(
            "expected type 'answer', got '{}'",
            answer.sdp_type
        )));
    }

    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        let answer = parse_answer(br#"{"sdp":"A","type":"answer","id":"xyz"}"#).unwrap();
        assert_eq!(answer.sdp, "A");
        assert_eq!(answer.assigned_id, "xyz");
    }

    #[test]
    fn test_parse_answer_rejects_offer_type() {
        let result = parse_answer(br#"{"sdp":"A","type":"offer","id":"xyz"}"#);
        assert!(matches!(result, Err(ClientError::InvalidAnswer(_))));
    }

    #[test]
    fn test_parse_answer_rejects_garbage() {
        assert!(matches!(parse_answer(b"<html>"), Err(ClientError::InvalidAnswer(_))));
    }
}
