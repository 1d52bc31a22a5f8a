//! Request attributes the router matches on.

use std::net::SocketAddr;

use axum::http::{HeaderMap, Method, Uri};

/// Header that overrides the Host header for routing.
pub const X_HOST_OVERRIDE: &str = "x-host-override";

/// Set by a TLS terminator in front of the gateway.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// The parts of an inbound request used for routing and forwarding.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Whether the client connection itself is TLS.
    pub tls: bool,
    /// Server name from the TLS handshake.
    pub sni: Option<String>,
    pub client_addr: Option<SocketAddr>,
    host: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        let mut ctx = Self {
            method,
            uri,
            headers,
            tls: false,
            sni: None,
            client_addr: None,
            host: None,
        };
        ctx.host = ctx.resolve_host();
        ctx
    }

    /// Mark the connection as TLS, with the handshake's server name.
    pub fn with_tls(mut self, sni: Option<String>) -> Self {
        self.tls = true;
        self.sni = sni;
        self.host = self.resolve_host();
        self
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// Host used for routing: lowercase, without port.
    ///
    /// Taken from `X-Host-Override`, then `Host`, then the request URI,
    /// then the TLS server name.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `X-Forwarded-Proto`, lowercased.
    pub fn forwarded_proto(&self) -> Option<String> {
        self.header(X_FORWARDED_PROTO)
            .map(|p| p.split(',').next().unwrap_or(p).trim().to_ascii_lowercase())
    }

    /// Whether the request reached us over TLS, or over TLS terminated
    /// upstream of the gateway when `accept_terminated` is set.
    pub fn is_https(&self, accept_terminated: bool) -> bool {
        self.tls || (accept_terminated && self.forwarded_proto().as_deref() == Some("https"))
    }

    /// First source that yields a non-empty host wins; blank headers fall
    /// through to the next one.
    fn resolve_host(&self) -> Option<String> {
        [
            self.header(X_HOST_OVERRIDE),
            self.header(axum::http::header::HOST.as_str()),
            self.uri.authority().map(|a| a.as_str()),
            self.sni.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find_map(normalize_host)
    }
}

/// Lowercase a host and strip any port. IPv6 literals keep their brackets.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // Strip userinfo from URI authorities.
    let raw = raw.rsplit_once('@').map_or(raw, |(_, host)| host);

    let host = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        raw.split(':').next().unwrap_or(raw)
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
