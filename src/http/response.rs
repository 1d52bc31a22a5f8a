//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map gateway errors to short JSON bodies
//! - Strip hop-by-hop headers from upstream responses
//! - Stream upstream bodies without buffering
//!
//! # Design Decisions
//! - Error bodies never contain internal details
//! - Upstream timeouts result in 504 Gateway Timeout

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::http::forward::strip_hop_by_hop;
use crate::lifecycle::GatewayError;

/// `{"message": ...}` with `status`.
pub fn json_message(status: StatusCode, message: &str) -> Response<Body> {
    (status, Json(json!({ "message": message }))).into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let mut response = json_message(self.status(), self.public_message());
        if matches!(self, GatewayError::HttpsRequired) {
            let headers = response.headers_mut();
            headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
            headers.insert(header::UPGRADE, HeaderValue::from_static("TLS/1.2, HTTP/1.1"));
        }
        response
    }
}

/// Turn an upstream response into the client response.
pub fn from_upstream(response: Response<hyper::body::Incoming>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    let switching = parts.status == StatusCode::SWITCHING_PROTOCOLS;
    strip_hop_by_hop(&mut parts.headers, switching);
    Response::from_parts(parts, Body::new(body))
}
