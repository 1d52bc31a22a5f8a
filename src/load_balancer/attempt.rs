//! Per-request balancer state.
//!
//! An `AttemptState` is owned by one request and threaded through every call
//! to `Balancer::resolve`. It is never shared.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use url::{Host, Url};

use crate::load_balancer::pool::BalancerPool;
use crate::store::entities::Timeouts;
use crate::store::Route;

/// How the target of a route is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Ipv4,
    Ipv6,
    /// An upstream name or a DNS name.
    Name,
}

/// Why an attempt did not produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Failed,
    TimedOut,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::TimedOut => "timed_out",
        }
    }
}

/// One past attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub host: String,
    pub port: u16,
    pub outcome: AttemptOutcome,
}

/// Where a route sends its traffic, as written in its `upstream_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub kind: TargetKind,
    /// IP literal (without brackets) or name, lowercase.
    pub host: String,
    pub port: u16,
    pub scheme: String,
    /// Path of the upstream URL, prepended to forwarded paths.
    pub path: String,
}

impl TargetSpec {
    pub fn from_url(url: &Url) -> Option<Self> {
        let (kind, host) = match url.host()? {
            Host::Ipv4(ip) => (TargetKind::Ipv4, ip.to_string()),
            Host::Ipv6(ip) => (TargetKind::Ipv6, ip.to_string()),
            Host::Domain(name) => (TargetKind::Name, name.to_ascii_lowercase()),
        };
        Some(Self {
            kind,
            host,
            port: url.port_or_known_default()?,
            scheme: url.scheme().to_string(),
            path: url.path().to_string(),
        })
    }
}

/// The address chosen for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub kind: TargetKind,
    /// IP or target host to connect to.
    pub host: String,
    pub port: u16,
    /// Name to present upstream in the `Host` header.
    pub hostname: String,
    pub scheme: String,
}

impl ResolvedAddress {
    pub fn from_ip(ip: IpAddr, port: u16, hostname: &str, scheme: &str) -> Self {
        Self {
            kind: match ip {
                IpAddr::V4(_) => TargetKind::Ipv4,
                IpAddr::V6(_) => TargetKind::Ipv6,
            },
            host: ip.to_string(),
            port,
            hostname: hostname.to_string(),
            scheme: scheme.to_string(),
        }
    }

    /// `host:port`, with IPv6 literals in brackets.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the upstream `Host` header. Default ports are omitted.
    pub fn host_header(&self) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        };
        let host = if self.hostname.contains(':') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

/// Retry bookkeeping of one request.
#[derive(Debug)]
pub struct AttemptState {
    pub target: TargetSpec,
    retries: u32,
    timeouts: Timeouts,
    try_count: u32,
    tries: Vec<AttemptRecord>,
    current: Option<ResolvedAddress>,
    /// Pool captured on first use; retries keep selecting from it.
    pub(crate) pool: Option<Arc<BalancerPool>>,
}

impl AttemptState {
    pub fn new(target: TargetSpec, retries: u32, timeouts: Timeouts) -> Self {
        Self {
            target,
            retries,
            timeouts,
            try_count: 0,
            tries: Vec::new(),
            current: None,
            pool: None,
        }
    }

    pub fn for_route(route: &Route) -> Option<Self> {
        let target = TargetSpec::from_url(&route.upstream_url)?;
        Some(Self::new(target, route.retries, route.timeouts()))
    }

    pub fn try_count(&self) -> u32 {
        self.try_count
    }

    /// Upper bound on `try_count`.
    pub fn max_tries(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn tries(&self) -> &[AttemptRecord] {
        &self.tries
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Address chosen by the latest successful `resolve`.
    pub fn current(&self) -> Option<&ResolvedAddress> {
        self.current.as_ref()
    }

    pub fn has_failed(&self, host: &str, port: u16) -> bool {
        self.tries.iter().any(|t| t.port == port && t.host == host)
    }

    /// Close the current attempt with `outcome` and count a new one.
    pub(crate) fn begin(&mut self, outcome: Option<AttemptOutcome>) {
        if let Some(current) = self.current.take() {
            self.tries.push(AttemptRecord {
                host: current.host,
                port: current.port,
                outcome: outcome.unwrap_or(AttemptOutcome::Failed),
            });
        }
        self.try_count = self.try_count.saturating_add(1);
    }

    pub(crate) fn set_current(&mut self, address: ResolvedAddress) {
        self.current = Some(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(url: &str) -> TargetSpec {
        TargetSpec::from_url(&Url::parse(url).unwrap()).unwrap()
    }

    #[test]
    fn test_target_spec_kinds() {
        assert_eq!(spec("http://10.0.0.1:9000").kind, TargetKind::Ipv4);
        assert_eq!(spec("http://10.0.0.1:9000").port, 9000);
        assert_eq!(spec("http://[::1]/x").kind, TargetKind::Ipv6);
        assert_eq!(spec("http://[::1]/x").host, "::1");
        assert_eq!(spec("http://[::1]/x").path, "/x");
        let named = spec("http://Svc");
        assert_eq!((named.kind, named.host.as_str(), named.port), (TargetKind::Name, "svc", 80));
    }

    #[test]
    fn test_address_formatting() {
        let v6 = ResolvedAddress::from_ip("::1".parse().unwrap(), 8080, "::1", "http");
        assert_eq!(v6.authority(), "[::1]:8080");
        assert_eq!(v6.host_header(), "[::1]:8080");

        let named = ResolvedAddress {
            kind: TargetKind::Name,
            host: "10.0.0.1".into(),
            port: 80,
            hostname: "svc".into(),
            scheme: "http".into(),
        };
        assert_eq!(named.host_header(), "svc");
        assert_eq!(named.to_string(), "http://10.0.0.1:80");
    }

    #[test]
    fn test_begin_records_previous_attempt() {
        let mut state = AttemptState::new(spec("http://svc"), 2, Timeouts::default());
        state.begin(Some(AttemptOutcome::TimedOut));
        assert_eq!(state.try_count(), 1);
        assert!(state.tries().is_empty());

        state.set_current(ResolvedAddress::from_ip("10.0.0.1".parse().unwrap(), 80, "svc", "http"));
        state.begin(Some(AttemptOutcome::TimedOut));
        assert_eq!(state.try_count(), 2);
        assert_eq!(state.tries()[0].outcome, AttemptOutcome::TimedOut);
        assert!(state.has_failed("10.0.0.1", 80));
        assert!(state.current().is_none());
    }
}
