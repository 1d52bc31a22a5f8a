//! Upstream request construction.
//!
//! # Responsibilities
//! - Rewrite the path: strip the matched prefix, prepend the upstream path
//! - Strip hop-by-hop headers, keep upgrade headers for WebSocket
//! - Add X-Real-IP, X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//! - Set Host to the upstream hostname unless the route preserves it
//!
//! # Design Decisions
//! - Existing X-Forwarded-For is extended, never replaced
//! - Bodies are buffered once so every retry resends the same bytes

use axum::body::Bytes;
use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Request, Uri};

use crate::http::request::X_REQUEST_ID;
use crate::lifecycle::GatewayError;
use crate::load_balancer::{ResolvedAddress, TargetSpec};
use crate::routing::{RequestContext, RouteMatch};

/// Largest request body buffered for forwarding.
pub const MAX_BUFFERED_BODY: usize = 16 * 1024 * 1024;

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Path and query to request from the upstream.
pub fn upstream_path_and_query(matched: &RouteMatch, target: &TargetSpec, uri: &Uri) -> String {
    let path = uri.path();
    let remainder = if matched.route.strip_path && matched.prefix_len > 0 {
        path.get(matched.prefix_len..).unwrap_or("")
    } else {
        path
    };

    let base = target.path.as_str();
    let mut joined = match (base.ends_with('/'), remainder.starts_with('/')) {
        _ if remainder.is_empty() => base.to_string(),
        (true, true) => format!("{}{}", base, &remainder[1..]),
        (false, false) => format!("{}/{}", base, remainder),
        _ => format!("{}{}", base, remainder),
    };
    if joined.is_empty() {
        joined.push('/');
    }

    match uri.query() {
        Some(query) => format!("{}?{}", joined, query),
        None => joined,
    }
}

/// Remove hop-by-hop headers. `Upgrade` and an upgrade `Connection` survive
/// when `keep_upgrade` is set.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    // Headers named in Connection are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .filter(|name| !(keep_upgrade && *name == header::UPGRADE))
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }

    if keep_upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    } else {
        headers.remove(header::UPGRADE);
    }
}

/// Set the forwarding headers the upstream sees.
pub fn apply_forwarding_headers(
    headers: &mut HeaderMap,
    ctx: &RequestContext,
    matched: &RouteMatch,
    address: &ResolvedAddress,
    request_id: &str,
) {
    let original_host = ctx.header(header::HOST.as_str()).map(str::to_string);

    if let Some(client) = ctx.client_addr {
        let ip = client.ip().to_string();
        let forwarded_for = match ctx.header(X_FORWARDED_FOR.as_str()) {
            Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
            _ => ip.clone(),
        };
        insert(headers, X_REAL_IP, &ip);
        insert(headers, X_FORWARDED_FOR, &forwarded_for);
    }

    let proto = if ctx.tls {
        "https".to_string()
    } else {
        ctx.forwarded_proto().unwrap_or_else(|| "http".to_string())
    };
    insert(headers, X_FORWARDED_PROTO, &proto);

    if let Some(host) = original_host.as_deref().or(ctx.host()) {
        insert(headers, X_FORWARDED_HOST, host);
    }
    insert(headers, X_REQUEST_ID, request_id);

    let upstream_host = match (&original_host, matched.route.preserve_host) {
        (Some(host), true) => host.clone(),
        _ => address.host_header(),
    };
    insert(headers, header::HOST, &upstream_host);
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "Dropping forwarding header with invalid value"),
    }
}

/// Everything about an inbound request that stays fixed across attempts.
#[derive(Debug)]
pub struct Forward<'a> {
    pub parts: &'a Parts,
    pub ctx: &'a RequestContext,
    pub matched: &'a RouteMatch,
    pub target: &'a TargetSpec,
    pub request_id: &'a str,
    pub upgrade: bool,
}

impl Forward<'_> {
    /// Build the request for one attempt against `address`.
    pub fn request(&self, body: Bytes, address: &ResolvedAddress) -> Result<Request<Bytes>, GatewayError> {
        let uri: Uri = upstream_path_and_query(self.matched, self.target, &self.parts.uri)
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| GatewayError::BadUpstreamRequest(e.to_string()))?;

        let mut headers = self.parts.headers.clone();
        strip_hop_by_hop(&mut headers, self.upgrade);
        apply_forwarding_headers(&mut headers, self.ctx, self.matched, address, self.request_id);
        if !self.upgrade && (!body.is_empty() || self.parts.headers.contains_key(header::CONTENT_LENGTH)) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        let mut request = Request::builder()
            .method(self.parts.method.clone())
            .uri(uri)
            .body(body)
            .map_err(|e| GatewayError::BadUpstreamRequest(e.to_string()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::TargetKind;
    use crate::store::Route;
    use axum::http::Method;
    use std::sync::Arc;
    use url::Url;

    fn matched(strip_path: bool, prefix_len: usize, preserve_host: bool) -> RouteMatch {
        let mut route = Route::new(Url::parse("http://svc").unwrap());
        route.strip_path = strip_path;
        route.preserve_host = preserve_host;
        RouteMatch {
            route: Arc::new(route),
            prefix_len,
        }
    }

    fn target(url: &str) -> TargetSpec {
        TargetSpec::from_url(&Url::parse(url).unwrap()).unwrap()
    }

    fn address() -> ResolvedAddress {
        ResolvedAddress {
            kind: TargetKind::Name,
            host: "10.0.0.1".into(),
            port: 8080,
            hostname: "svc".into(),
            scheme: "http".into(),
        }
    }

    #[test]
    fn test_path_joining() {
        let uri: Uri = "/v1/users/5?page=2".parse().unwrap();
        assert_eq!(
            upstream_path_and_query(&matched(false, 3, false), &target("http://svc"), &uri),
            "/v1/users/5?page=2"
        );
        assert_eq!(
            upstream_path_and_query(&matched(true, 3, false), &target("http://svc"), &uri),
            "/users/5?page=2"
        );
        assert_eq!(
            upstream_path_and_query(&matched(true, 3, false), &target("http://svc/api/"), &uri),
            "/api/users/5?page=2"
        );
        assert_eq!(
            upstream_path_and_query(&matched(true, 3, false), &target("http://svc/api"), &"/v1".parse().unwrap()),
            "/api"
        );
        assert_eq!(
            upstream_path_and_query(&matched(true, 3, false), &target("http://svc"), &"/v1".parse().unwrap()),
            "/"
        );
        assert_eq!(
            upstream_path_and_query(&matched(true, 3, false), &target("http://svc/api"), &"/v1x".parse().unwrap()),
            "/api/x"
        );
    }

    #[test]
    fn test_hop_by_hop_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers, false);
        assert!(headers.get("x-secret").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::UPGRADE).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "*/*");
    }

    #[test]
    fn test_upgrade_headers_kept_for_websocket() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));

        strip_hop_by_hop(&mut headers, true);
        assert_eq!(headers.get(header::UPGRADE).unwrap(), "websocket");
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "upgrade");
    }

    #[test]
    fn test_forwarding_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("api.example.com"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1"));
        let ctx = RequestContext::new(Method::GET, "/".parse().unwrap(), inbound.clone())
            .with_client_addr("10.9.8.7:4000".parse().unwrap());

        let mut headers = inbound.clone();
        apply_forwarding_headers(&mut headers, &ctx, &matched(false, 0, false), &address(), "rid-1");
        assert_eq!(headers.get("x-real-ip").unwrap(), "10.9.8.7");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "1.1.1.1, 10.9.8.7");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "api.example.com");
        assert_eq!(headers.get("x-request-id").unwrap(), "rid-1");
        assert_eq!(headers.get(header::HOST).unwrap(), "svc:8080");

        let mut preserved = inbound;
        apply_forwarding_headers(&mut preserved, &ctx, &matched(false, 0, true), &address(), "rid-1");
        assert_eq!(preserved.get(header::HOST).unwrap(), "api.example.com");
    }
}
