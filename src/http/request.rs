//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) unless the client sent one
//! - Extract routing-relevant information (host, path, method, headers)
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Original request preserved for logging; a modified copy is forwarded

use std::net::SocketAddr;

use axum::http::{request::Parts, HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::routing::RequestContext;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer that assigns `X-Request-Id` to requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request's `X-Request-Id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// The request ID set by `set_request_id_layer`, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Routing view of an inbound request. The listener is plaintext, so TLS is
/// only ever known through `X-Forwarded-Proto`.
pub fn context_from_parts(parts: &Parts, client: SocketAddr) -> RequestContext {
    RequestContext::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone()).with_client_addr(client)
}
