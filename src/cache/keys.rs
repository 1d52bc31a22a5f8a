//! Well-known cache keys.

use uuid::Uuid;

/// Current generation of route data. Cached with no TTL.
pub const ROUTER_VERSION: &str = "router:version";

/// Upstream name → record index used by the balancer.
pub const BALANCER_UPSTREAMS: &str = "balancer:upstreams";

/// Balancer pool of one upstream.
pub fn balancer_targets(upstream_id: &Uuid) -> String {
    format!("balancer:targets:{}", upstream_id)
}

/// DNS answer for a host name.
pub fn dns(name: &str) -> String {
    format!("dns:{}", name.to_ascii_lowercase())
}

pub fn pem_certificate(sni: &str) -> String {
    format!("pem_ssl_certificates:{}", sni)
}

pub fn parsed_certificate(sni: &str) -> String {
    format!("parsed_ssl_certificates:{}", sni)
}
