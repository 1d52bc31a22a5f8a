//! Name resolution for targets that are neither IPs nor upstreams.

use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;

/// Addresses for a name and how long they stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub addrs: Vec<IpAddr>,
    /// Remaining TTL of the answer as reported by the resolver.
    pub ttl: Duration,
}

#[async_trait]
pub trait Resolver: Send + Sync + std::fmt::Debug {
    /// All addresses `host` resolves to, in resolver order.
    async fn lookup(&self, host: &str) -> io::Result<DnsAnswer>;
}

/// Resolver using the host's DNS configuration (`/etc/resolv.conf` and the
/// hosts file).
#[derive(Clone)]
pub struct SystemResolver {
    inner: TokioResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        let builder = match TokioResolver::builder_tokio() {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "System DNS configuration unreadable, using default resolvers");
                TokioResolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
            }
        };
        Self { inner: builder.build() }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<DnsAnswer> {
        let lookup = self.inner.lookup_ip(host).await.map_err(io::Error::other)?;
        let ttl = lookup.valid_until().saturating_duration_since(Instant::now());

        let mut addrs: Vec<IpAddr> = lookup.iter().collect();
        addrs.dedup();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        Ok(DnsAnswer { addrs, ttl })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localhost_resolves() {
        let answer = SystemResolver::new().lookup("localhost").await.unwrap();
        assert!(answer.addrs.iter().any(|a| a.is_loopback()));
    }
}
