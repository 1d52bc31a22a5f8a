//! Stored entity definitions.
//!
//! # Responsibilities
//! - Define Route, Upstream, Target and Sni records
//! - Validate records before they enter the store
//! - Expose per-kind cache identity (`EntityCacheKey`)
//!
//! # Design Decisions
//! - Records are plain data; a compiled Router never mutates them
//! - An edit produces a new record, never an in-place change
//! - Target records form a history: the newest record per `host:port` wins

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::cache::keys;

/// Default connect/send/read timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default number of balancer retries for a route.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default weight of a newly added target.
pub const DEFAULT_TARGET_WEIGHT: u32 = 100;

/// Highest weight a target may carry.
pub const MAX_TARGET_WEIGHT: u32 = 1000;

/// Port used when a target omits one.
pub const DEFAULT_TARGET_PORT: u16 = 8000;

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch, strictly increasing within the process.
///
/// Creation order is derived from `created_at`, so two records created in the
/// same millisecond must still compare in the order they were made.
pub fn now_millis() -> u64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let previous = LAST_TIMESTAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(wall.max(last + 1)))
        .unwrap_or(wall);
    wall.max(previous + 1)
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_weight() -> u32 {
    DEFAULT_TARGET_WEIGHT
}

/// Kind of a stored entity. The string form doubles as the event subtopic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Routes,
    Upstreams,
    Targets,
    Snis,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Routes => "routes",
            EntityKind::Upstreams => "upstreams",
            EntityKind::Targets => "targets",
            EntityKind::Snis => "snis",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routes" => Ok(EntityKind::Routes),
            "upstreams" => Ok(EntityKind::Upstreams),
            "targets" => Ok(EntityKind::Targets),
            "snis" => Ok(EntityKind::Snis),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// Mutation that produced an invalidation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attempt timeouts derived from a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub send: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        let d = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        Self {
            connect: d,
            send: d,
            read: d,
        }
    }
}

/// A rule mapping request attributes to an upstream target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Human readable name, used in logs and by declarative config.
    #[serde(default)]
    pub name: Option<String>,

    /// Creation time in milliseconds; earlier routes win ties.
    #[serde(default = "now_millis")]
    pub created_at: u64,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default)]
    pub methods: Vec<String>,

    /// Header name → accepted values.
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub https_only: bool,

    /// Accept plaintext when a TLS terminator set `X-Forwarded-Proto: https`.
    #[serde(default)]
    pub http_if_terminated: bool,

    /// Remove the matched path prefix before forwarding.
    #[serde(default)]
    pub strip_path: bool,

    /// Forward the client's Host header instead of the upstream host.
    #[serde(default)]
    pub preserve_host: bool,

    /// Where matched requests go: an IP, an Upstream name, or a DNS name.
    pub upstream_url: Url,

    #[serde(default = "default_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_timeout")]
    pub send_timeout: u64,

    #[serde(default = "default_timeout")]
    pub read_timeout: u64,

    /// Maximum number of balancer retries after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Route {
    /// A catch-all route with default settings pointing at `upstream_url`.
    pub fn new(upstream_url: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            created_at: now_millis(),
            hosts: Vec::new(),
            paths: Vec::new(),
            methods: Vec::new(),
            headers: BTreeMap::new(),
            https_only: false,
            http_if_terminated: false,
            strip_path: false,
            preserve_host: false,
            upstream_url,
            connect_timeout: DEFAULT_TIMEOUT_MS,
            send_timeout: DEFAULT_TIMEOUT_MS,
            read_timeout: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Name for logs, falling back to the id.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout),
            send: Duration::from_millis(self.send_timeout),
            read: Duration::from_millis(self.read_timeout),
        }
    }

    /// Semantic checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = self.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(format!("path '{}' must start with '/'", path));
        }
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err("hosts must not contain empty values".to_string());
        }
        if self.upstream_url.scheme() != "http" {
            return Err(format!(
                "upstream_url scheme '{}' is not supported (expected http)",
                self.upstream_url.scheme()
            ));
        }
        if self.upstream_url.host().is_none() {
            return Err("upstream_url must have a host".to_string());
        }
        if self.connect_timeout == 0 || self.send_timeout == 0 || self.read_timeout == 0 {
            return Err("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// A named logical service backed by Targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "now_millis")]
    pub created_at: u64,
}

impl Upstream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now_millis(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("upstream name must not be empty".to_string());
        }
        if self.name.contains(':') {
            return Err(format!("upstream name '{}' must not contain ':'", self.name));
        }
        Ok(())
    }
}

/// One network endpoint of an Upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub upstream_id: Uuid,
    /// `host:port`; the port defaults to 8000 when omitted.
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "now_millis")]
    pub created_at: u64,
}

impl Target {
    pub fn new(upstream_id: Uuid, target: impl Into<String>, weight: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            upstream_id,
            target: target.into(),
            weight,
            created_at: now_millis(),
        }
    }

    /// Split `target` into host and port. IPv6 hosts use brackets.
    pub fn host_port(&self) -> Option<(String, u16)> {
        parse_host_port(&self.target, DEFAULT_TARGET_PORT)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host_port().is_none() {
            return Err(format!("invalid target '{}'", self.target));
        }
        if self.weight > MAX_TARGET_WEIGHT {
            return Err(format!(
                "weight {} exceeds maximum of {}",
                self.weight, MAX_TARGET_WEIGHT
            ));
        }
        Ok(())
    }
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
pub fn parse_host_port(input: &str, default_port: u16) -> Option<(String, u16)> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        host.parse::<std::net::Ipv6Addr>().ok()?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if after.is_empty() => default_port,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    // A bare IPv6 literal has more than one colon.
    if input.parse::<IpAddr>().is_ok() {
        return Some((input.to_string(), default_port));
    }

    match input.split_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host.to_string(), port.parse().ok()?)),
        Some(_) => None,
        None => Some((input.to_string(), default_port)),
    }
}

/// A TLS server name bound to a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sni {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub certificate_id: Uuid,
    #[serde(default = "now_millis")]
    pub created_at: u64,
}

/// Any stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Route(Route),
    Upstream(Upstream),
    Target(Target),
    Sni(Sni),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Route(_) => EntityKind::Routes,
            Entity::Upstream(_) => EntityKind::Upstreams,
            Entity::Target(_) => EntityKind::Targets,
            Entity::Sni(_) => EntityKind::Snis,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Entity::Route(r) => r.id,
            Entity::Upstream(u) => u.id,
            Entity::Target(t) => t.id,
            Entity::Sni(s) => s.id,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Entity::Route(r) => r.validate(),
            Entity::Upstream(u) => u.validate(),
            Entity::Target(t) => t.validate(),
            Entity::Sni(s) if s.name.trim().is_empty() => Err("sni name must not be empty".into()),
            Entity::Sni(_) => Ok(()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            Entity::Route(r) => serde_json::to_value(r),
            Entity::Upstream(u) => serde_json::to_value(u),
            Entity::Target(t) => serde_json::to_value(t),
            Entity::Sni(s) => serde_json::to_value(s),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(kind: EntityKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::Routes => Entity::Route(serde_json::from_value(value)?),
            EntityKind::Upstreams => Entity::Upstream(serde_json::from_value(value)?),
            EntityKind::Targets => Entity::Target(serde_json::from_value(value)?),
            EntityKind::Snis => Entity::Sni(serde_json::from_value(value)?),
        })
    }
}

/// Cache identity of an entity, if it has one.
///
/// Entities without a meaningful cache key return `None`; their invalidation
/// is handled by the per-kind rules of the invalidation coordinator.
pub trait EntityCacheKey {
    fn cache_key(&self) -> Option<String> {
        None
    }
}

/// Route data is cached as a whole inside the compiled router, whose cache
/// identity is the router version token.
impl EntityCacheKey for Route {
    fn cache_key(&self) -> Option<String> {
        Some(keys::ROUTER_VERSION.to_string())
    }
}

impl EntityCacheKey for Upstream {}

/// A target record changes the membership of its upstream's pool.
impl EntityCacheKey for Target {
    fn cache_key(&self) -> Option<String> {
        Some(keys::balancer_targets(&self.upstream_id))
    }
}

impl EntityCacheKey for Sni {}

impl EntityCacheKey for Entity {
    fn cache_key(&self) -> Option<String> {
        match self {
            Entity::Route(r) => r.cache_key(),
            Entity::Upstream(u) => u.cache_key(),
            Entity::Target(t) => t.cache_key(),
            Entity::Sni(s) => s.cache_key(),
        }
    }
}
