//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse, weights bounded)
//! - Reject duplicate declarative names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{GatewayConfig, RouteConfig};
use crate::store::entities::{parse_host_port, DEFAULT_TARGET_PORT, MAX_TARGET_WEIGHT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `routes[2].paths`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.node.workers == 0 {
        errors.push(ValidationError::new("node.workers", "must be at least 1"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    let mut route_names = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if !route_names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(
                format!("routes[{}].name", i),
                format!("duplicate route name '{}'", route.name),
            ));
        }
        validate_route(i, route, &mut errors);
    }

    let mut upstream_names = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let field = format!("upstreams[{}]", i);
        if upstream.name.is_empty() || upstream.name.contains(':') {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                "must be non-empty and must not contain ':'",
            ));
        }
        if !upstream_names.insert(upstream.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate upstream name '{}'", upstream.name),
            ));
        }

        let mut seen = HashSet::new();
        for (j, target) in upstream.targets.iter().enumerate() {
            let field = format!("{}.targets[{}]", field, j);
            match parse_host_port(&target.target, DEFAULT_TARGET_PORT) {
                Some(host_port) => {
                    if !seen.insert(host_port) {
                        errors.push(ValidationError::new(&field, "duplicate target"));
                    }
                }
                None => errors.push(ValidationError::new(
                    format!("{}.target", field),
                    format!("'{}' is not host[:port]", target.target),
                )),
            }
            if target.weight > MAX_TARGET_WEIGHT {
                errors.push(ValidationError::new(
                    format!("{}.weight", field),
                    format!("must be at most {}", MAX_TARGET_WEIGHT),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(i: usize, route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("routes[{}].{}", i, name);

    if route.name.is_empty() {
        errors.push(ValidationError::new(field("name"), "must not be empty"));
    }
    for path in &route.paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(field("paths"), format!("'{}' must start with '/'", path)));
        }
    }
    for name in route.headers.keys() {
        if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(field("headers"), format!("'{}' is not a header name", name)));
        }
    }
    match Url::parse(&route.upstream_url) {
        Ok(url) if url.scheme() != "http" => {
            errors.push(ValidationError::new(field("upstream_url"), "only http upstreams are supported"));
        }
        Ok(url) if url.host().is_none() => {
            errors.push(ValidationError::new(field("upstream_url"), "must have a host"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new(field("upstream_url"), e.to_string())),
    }
    if route.connect_timeout_ms == 0 || route.send_timeout_ms == 0 || route.read_timeout_ms == 0 {
        errors.push(ValidationError::new(field("timeouts"), "must be greater than zero"));
    }
}
