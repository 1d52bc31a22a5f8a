//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Forward the handshake to the upstream like any other request
//! - Splice the two upgraded connections together after `101 Switching Protocols`
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Gateway ←──── raw bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Byte-level forwarding; frames are never parsed
//! - The tunnel lives in its own task and outlives the handler

use axum::http::{header, HeaderMap};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

/// Whether the request asks to upgrade to WebSocket. Case-insensitive.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// Copy bytes both ways once both sides have completed their upgrade.
pub fn spawn_tunnel(client: OnUpgrade, upstream: OnUpgrade, request_id: String) {
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "WebSocket upgrade failed");
                return;
            }
        };

        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((sent, received)) => {
                tracing::debug!(request_id = %request_id, sent, received, "WebSocket tunnel closed");
            }
            Err(e) => {
                tracing::debug!(request_id = %request_id, error = %e, "WebSocket tunnel closed with error");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_upgrade_detection_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_upgrade_request(&headers));
    }
}
