//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::entities::{DEFAULT_RETRIES, DEFAULT_TARGET_WEIGHT, DEFAULT_TIMEOUT_MS};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Proxy listener configuration.
    pub listener: ListenerConfig,

    /// Node identity and worker count.
    pub node: NodeConfig,

    /// Router compilation options.
    pub router: RouterConfig,

    /// Balancer strategy and DNS caching.
    pub balancer: BalancerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Declarative routes, synced into the store on start and reload.
    pub routes: Vec<RouteConfig>,

    /// Declarative upstreams and their targets.
    pub upstreams: Vec<UpstreamConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_connections: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Cluster-unique node name. Empty means "generate one at start".
    pub id: String,

    /// Number of independent workers on this node.
    pub workers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Refuse to build a router containing two routes with identical criteria.
    pub reject_ambiguous: bool,
}

/// Target selection strategy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BalancerAlgorithm {
    #[default]
    WeightedRandom,
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BalancerConfig {
    pub algorithm: BalancerAlgorithm,

    /// Upper bound, in seconds, on how long a DNS answer is cached. Answers
    /// with a shorter TTL expire sooner.
    pub dns_ttl_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: BalancerAlgorithm::WeightedRandom,
            dns_ttl_secs: 30,
        }
    }
}

/// Timeout configuration for the proxy listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on a whole client request, retries included, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 300 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8001".to_string(),
        }
    }
}

/// A declarative route. Identified across reloads by `name`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    pub name: String,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub https_only: bool,

    #[serde(default)]
    pub http_if_terminated: bool,

    #[serde(default)]
    pub strip_path: bool,

    #[serde(default)]
    pub preserve_host: bool,

    /// e.g. "http://svc" (upstream name), "http://10.0.0.1:8080" or "http://example.com".
    pub upstream_url: String,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// A declarative upstream. Identified across reloads by `name`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UpstreamConfig {
    pub name: String,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TargetConfig {
    /// Target address (e.g., "10.0.0.1:3000").
    pub target: String,

    /// Weight for weighted load balancing (0 disables the target).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_weight() -> u32 {
    DEFAULT_TARGET_WEIGHT
}
