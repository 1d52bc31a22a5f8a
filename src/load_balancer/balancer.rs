//! Target resolution with retry bookkeeping.
//!
//! # Responsibilities
//! - Turn a route's target into a concrete address per attempt
//! - Never repeat a failed target while an alternative exists
//! - Enforce the retry budget
//!
//! # Data Flow
//! ```text
//! resolve(attempt, previous outcome)
//!     → record previous outcome, try_count += 1, check budget
//!     → IP literal?       → that IP
//!     → upstream name?    → pool (cache "balancer:targets:<id>") → strategy
//!     → otherwise         → DNS (cache "dns:<name>", answer TTL capped by config)
//! ```
//!
//! # Design Decisions
//! - Only the caller's AttemptState is mutated; pools are shared read-only
//! - Pools and the name index are loaded lazily and dropped by invalidation
//! - Load errors are not cached, so the next request retries the load

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{keys, Cache, FOREVER};
use crate::config::{BalancerAlgorithm, BalancerConfig};
use crate::events::UpstreamRef;
use crate::load_balancer::attempt::{AttemptOutcome, AttemptState, ResolvedAddress, TargetKind};
use crate::load_balancer::dns::Resolver;
use crate::load_balancer::pool::BalancerPool;
use crate::load_balancer::strategy_for;
use crate::observability::metrics;
use crate::store::{DataStore, StoreError};

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("failed to resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    #[error("no healthy targets left in upstream {upstream}")]
    NoHealthyUpstream { upstream: String },

    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("balancer data unavailable: {0}")]
    DataUnavailable(#[from] StoreError),
}

impl BalancerError {
    fn label(&self) -> &'static str {
        match self {
            BalancerError::ResolutionFailed { .. } => "resolution_failed",
            BalancerError::NoHealthyUpstream { .. } => "no_healthy_upstream",
            BalancerError::RetriesExhausted { .. } => "retries_exhausted",
            BalancerError::DataUnavailable(_) => "data_unavailable",
        }
    }
}

/// Shortest time a DNS answer is cached. A zero TTL would mean "forever" to
/// the cache.
const MIN_DNS_TTL: Duration = Duration::from_secs(1);

/// How long to cache an answer: its own TTL, capped at the configured limit.
fn dns_cache_ttl(answer_ttl: Duration, cap: Duration) -> Duration {
    answer_ttl.clamp(MIN_DNS_TTL, cap.max(MIN_DNS_TTL))
}

/// Upstream name → identity.
type UpstreamIndex = HashMap<String, UpstreamRef>;

/// A worker's balancer.
pub struct Balancer {
    cache: Arc<Cache>,
    store: Arc<dyn DataStore>,
    resolver: Arc<dyn Resolver>,
    algorithm: BalancerAlgorithm,
    dns_ttl: Duration,
}

impl Balancer {
    pub fn new(
        cache: Arc<Cache>,
        store: Arc<dyn DataStore>,
        resolver: Arc<dyn Resolver>,
        config: &BalancerConfig,
    ) -> Self {
        Self {
            cache,
            store,
            resolver,
            algorithm: config.algorithm,
            dns_ttl: Duration::from_secs(config.dns_ttl_secs).max(MIN_DNS_TTL),
        }
    }

    /// Resolve the address for the next attempt of a request.
    ///
    /// `previous` is the outcome of the attempt made with the address the
    /// last call returned; `None` on the first call (and treated as a
    /// failure on later calls).
    pub async fn resolve(
        &self,
        attempt: &mut AttemptState,
        previous: Option<AttemptOutcome>,
    ) -> Result<ResolvedAddress, BalancerError> {
        if let (Some(outcome), Some(_)) = (previous, attempt.current()) {
            metrics::record_balancer_attempt(outcome.as_str());
        }
        attempt.begin(previous);

        let result = if attempt.try_count() > attempt.max_tries() {
            Err(BalancerError::RetriesExhausted {
                attempts: attempt.try_count() - 1,
            })
        } else {
            self.select(attempt).await
        };

        match result {
            Ok(address) => {
                tracing::debug!(
                    target_host = %attempt.target.host,
                    address = %address,
                    try_count = attempt.try_count(),
                    "Balancer selected address"
                );
                metrics::record_balancer_attempt("selected");
                attempt.set_current(address.clone());
                Ok(address)
            }
            Err(e) => {
                tracing::debug!(error = %e, try_count = attempt.try_count(), "Balancer resolution failed");
                metrics::record_balancer_attempt(e.label());
                Err(e)
            }
        }
    }

    async fn select(&self, attempt: &mut AttemptState) -> Result<ResolvedAddress, BalancerError> {
        let target = attempt.target.clone();

        if matches!(target.kind, TargetKind::Ipv4 | TargetKind::Ipv6) {
            let ip: IpAddr = target.host.parse().map_err(|_| BalancerError::ResolutionFailed {
                host: target.host.clone(),
                reason: "invalid IP literal".into(),
            })?;
            return Ok(ResolvedAddress::from_ip(ip, target.port, &target.host, &target.scheme));
        }

        let pool = match attempt.pool.clone() {
            Some(pool) => Some(pool),
            None => match self.upstream_by_name(&target.host).await? {
                Some(upstream) => {
                    let pool = self.pool(&upstream).await?;
                    attempt.pool = Some(pool.clone());
                    Some(pool)
                }
                None => None,
            },
        };

        match pool {
            Some(pool) => {
                let chosen = pool
                    .select(|t| attempt.has_failed(&t.host, t.port))
                    .ok_or_else(|| BalancerError::NoHealthyUpstream {
                        upstream: pool.upstream().name.clone(),
                    })?;
                Ok(ResolvedAddress {
                    kind: TargetKind::Name,
                    host: chosen.host.clone(),
                    port: chosen.port,
                    hostname: target.host.clone(),
                    scheme: target.scheme.clone(),
                })
            }
            None => {
                let addrs = self.lookup(&target.host).await?;
                if addrs.is_empty() {
                    return Err(BalancerError::ResolutionFailed {
                        host: target.host.clone(),
                        reason: "no addresses".into(),
                    });
                }
                let fresh: Vec<IpAddr> = addrs
                    .iter()
                    .copied()
                    .filter(|ip| !attempt.has_failed(&ip.to_string(), target.port))
                    .collect();
                // Every address failed already: any of them is as good as another.
                let choices: &[IpAddr] = if fresh.is_empty() { addrs.as_slice() } else { fresh.as_slice() };
                let ip = choices[fastrand::usize(..choices.len())];
                Ok(ResolvedAddress::from_ip(ip, target.port, &target.host, &target.scheme))
            }
        }
    }

    /// Identity of the upstream called `name`, if one exists.
    pub async fn upstream_by_name(&self, name: &str) -> Result<Option<UpstreamRef>, BalancerError> {
        let index = self
            .cache
            .get(keys::BALANCER_UPSTREAMS, FOREVER, || async {
                let upstreams = self.store.list_upstreams().await?;
                Ok::<_, StoreError>(
                    upstreams
                        .iter()
                        .map(|u| (u.name.to_ascii_lowercase(), UpstreamRef::from(u)))
                        .collect::<UpstreamIndex>(),
                )
            })
            .await?;
        Ok(index.get(&name.to_ascii_lowercase()).cloned())
    }

    /// The current pool of `upstream`, loading it on a miss.
    pub async fn pool(&self, upstream: &UpstreamRef) -> Result<Arc<BalancerPool>, BalancerError> {
        let pool = self
            .cache
            .get(&keys::balancer_targets(&upstream.id), FOREVER, || async {
                let history = self.store.list_targets(&upstream.id).await?;
                let pool = BalancerPool::from_history(upstream.clone(), history, strategy_for(self.algorithm));
                tracing::debug!(upstream = %upstream, targets = pool.targets().len(), "Balancer pool built");
                Ok::<_, StoreError>(pool)
            })
            .await?;
        Ok(pool)
    }

    async fn lookup(&self, host: &str) -> Result<Arc<Vec<IpAddr>>, BalancerError> {
        self.cache
            .get_with_ttl(&keys::dns(host), || async {
                let answer = self.resolver.lookup(host).await?;
                let ttl = dns_cache_ttl(answer.ttl, self.dns_ttl);
                tracing::debug!(host, addresses = answer.addrs.len(), ttl = ?ttl, "DNS answer cached");
                Ok::<_, std::io::Error>((answer.addrs, ttl))
            })
            .await
            .map_err(|e| BalancerError::ResolutionFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })
    }

    /// Drop this worker's pool and name index entries for `upstream`.
    pub fn invalidate_upstream(&self, upstream: &UpstreamRef) {
        self.cache.invalidate_local(&keys::balancer_targets(&upstream.id));
        self.cache.invalidate_local(keys::BALANCER_UPSTREAMS);
        tracing::debug!(upstream = %upstream, "Balancer pool invalidated");
    }

    /// Drop this worker's pool for the upstream with id `upstream_id`.
    pub fn invalidate_targets(&self, upstream_id: &uuid::Uuid) {
        self.cache.invalidate_local(&keys::balancer_targets(upstream_id));
    }
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("algorithm", &self.algorithm)
            .field("dns_ttl", &self.dns_ttl)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::attempt::TargetSpec;
    use crate::load_balancer::DnsAnswer;
    use crate::store::entities::Timeouts;
    use crate::store::{Entity, MemoryStore, Target, Upstream};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    #[derive(Debug, Default)]
    struct FakeResolver {
        answers: HashMap<String, DnsAnswer>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn lookup(&self, host: &str) -> io::Result<DnsAnswer> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "nxdomain"))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        resolver: Arc<FakeResolver>,
        balancer: Balancer,
    }

    fn fixture(algorithm: BalancerAlgorithm) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut resolver = FakeResolver::default();
        resolver.answers.insert(
            "example.com".into(),
            DnsAnswer {
                addrs: vec!["10.1.0.1".parse().unwrap(), "10.1.0.2".parse().unwrap()],
                ttl: Duration::from_secs(300),
            },
        );
        resolver.answers.insert(
            "short.example".into(),
            DnsAnswer {
                addrs: vec!["10.2.0.1".parse().unwrap()],
                ttl: Duration::from_secs(1),
            },
        );
        let resolver = Arc::new(resolver);
        let config = BalancerConfig {
            algorithm,
            ..BalancerConfig::default()
        };
        let balancer = Balancer::new(Arc::new(Cache::detached()), store.clone(), resolver.clone(), &config);
        Fixture {
            store,
            resolver,
            balancer,
        }
    }

    async fn add_upstream(store: &MemoryStore, name: &str, targets: &[(&str, u32)]) -> Upstream {
        let upstream = Upstream::new(name);
        store.upsert(Entity::Upstream(upstream.clone())).await.unwrap();
        for (target, weight) in targets {
            store
                .upsert(Entity::Target(Target::new(upstream.id, *target, *weight)))
                .await
                .unwrap();
        }
        upstream
    }

    fn attempt(url: &str, retries: u32) -> AttemptState {
        let spec = TargetSpec::from_url(&Url::parse(url).unwrap()).unwrap();
        AttemptState::new(spec, retries, Timeouts::default())
    }

    #[tokio::test]
    async fn test_ip_literal_resolves_directly() {
        let f = fixture(BalancerAlgorithm::WeightedRandom);
        let mut state = attempt("http://10.0.0.7:9000", 0);

        let addr = f.balancer.resolve(&mut state, None).await.unwrap();
        assert_eq!(addr.kind, TargetKind::Ipv4);
        assert_eq!(addr.authority(), "10.0.0.7:9000");
        assert_eq!(f.resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_never_repeats_failed_target_then_exhausts() {
        let f = fixture(BalancerAlgorithm::WeightedRandom);
        add_upstream(&f.store, "svc", &[("h1:80", 1), ("h2:80", 1)]).await;
        let mut state = attempt("http://svc", 1);

        let first = f.balancer.resolve(&mut state, None).await.unwrap();
        let second = f
            .balancer
            .resolve(&mut state, Some(AttemptOutcome::Failed))
            .await
            .unwrap();
        assert_ne!(first.host, second.host);
        assert_eq!(second.hostname, "svc");

        let err = f
            .balancer
            .resolve(&mut state, Some(AttemptOutcome::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, BalancerError::RetriesExhausted { attempts: 2 }));
        assert_eq!(state.try_count(), 3);
        assert_eq!(state.tries().len(), 2);
    }

    #[tokio::test]
    async fn test_all_targets_excluded_is_no_healthy_upstream() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        add_upstream(&f.store, "svc", &[("h1:80", 1)]).await;
        let mut state = attempt("http://svc", 5);

        f.balancer.resolve(&mut state, None).await.unwrap();
        let err = f
            .balancer
            .resolve(&mut state, Some(AttemptOutcome::TimedOut))
            .await
            .unwrap_err();
        assert!(matches!(err, BalancerError::NoHealthyUpstream { .. }));
        assert_eq!(state.tries()[0].outcome, AttemptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_try_count_equals_calls() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        let targets: Vec<String> = (0..10).map(|i| format!("h{}:80", i)).collect();
        let pairs: Vec<(&str, u32)> = targets.iter().map(|t| (t.as_str(), 1)).collect();
        add_upstream(&f.store, "svc", &pairs).await;

        let retries = 3;
        let mut state = attempt("http://svc", retries);
        let mut seen = HashSet::new();
        for k in 1..=retries + 1 {
            let previous = (k > 1).then_some(AttemptOutcome::Failed);
            let addr = f.balancer.resolve(&mut state, previous).await.unwrap();
            assert_eq!(state.try_count(), k);
            assert!(seen.insert(addr.host));
        }
        assert!(matches!(
            f.balancer.resolve(&mut state, Some(AttemptOutcome::Failed)).await,
            Err(BalancerError::RetriesExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_pool_captured_for_the_request() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        let up = add_upstream(&f.store, "svc", &[("h1:80", 1), ("h2:80", 1)]).await;
        let mut state = attempt("http://svc", 3);
        f.balancer.resolve(&mut state, None).await.unwrap();

        // Membership changes and the pool is invalidated mid-request.
        f.store
            .upsert(Entity::Target(Target::new(up.id, "h3:80", 1)))
            .await
            .unwrap();
        f.balancer.invalidate_upstream(&UpstreamRef::from(&up));

        for _ in 0..2 {
            if let Ok(addr) = f.balancer.resolve(&mut state, Some(AttemptOutcome::Failed)).await {
                assert_ne!(addr.host, "h3");
            }
        }

        // A new request sees the new pool.
        let pool = f.balancer.pool(&UpstreamRef::from(&up)).await.unwrap();
        assert_eq!(pool.targets().len(), 3);
    }

    #[tokio::test]
    async fn test_dns_cached_and_failed_address_avoided() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        let mut state = attempt("http://example.com:8080", 2);

        let first = f.balancer.resolve(&mut state, None).await.unwrap();
        let second = f
            .balancer
            .resolve(&mut state, Some(AttemptOutcome::Failed))
            .await
            .unwrap();
        assert_ne!(first.host, second.host);
        assert_eq!(second.port, 8080);
        assert_eq!(second.hostname, "example.com");
        assert_eq!(f.resolver.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dns_answer_expires_with_its_ttl() {
        let f = fixture(BalancerAlgorithm::RoundRobin);

        f.balancer.resolve(&mut attempt("http://short.example", 0), None).await.unwrap();
        f.balancer.resolve(&mut attempt("http://example.com", 0), None).await.unwrap();
        f.balancer.resolve(&mut attempt("http://short.example", 0), None).await.unwrap();
        assert_eq!(f.resolver.lookups.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // The 1s answer is gone, the long-lived one (capped at 30s) is not.
        f.balancer.resolve(&mut attempt("http://short.example", 0), None).await.unwrap();
        f.balancer.resolve(&mut attempt("http://example.com", 0), None).await.unwrap();
        assert_eq!(f.resolver.lookups.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dns_cache_ttl_bounds() {
        let cap = Duration::from_secs(30);
        assert_eq!(dns_cache_ttl(Duration::from_secs(5), cap), Duration::from_secs(5));
        assert_eq!(dns_cache_ttl(Duration::from_secs(3600), cap), cap);
        assert_eq!(dns_cache_ttl(Duration::ZERO, cap), MIN_DNS_TTL);
        assert_eq!(dns_cache_ttl(Duration::from_secs(5), Duration::ZERO), MIN_DNS_TTL);
    }

    #[tokio::test]
    async fn test_unknown_name_fails_resolution() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        let mut state = attempt("http://nowhere.invalid", 0);
        assert!(matches!(
            f.balancer.resolve(&mut state, None).await,
            Err(BalancerError::ResolutionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_outage_is_data_unavailable_and_not_cached() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        add_upstream(&f.store, "svc", &[("h1:80", 1)]).await;

        f.store.set_available(false);
        let mut state = attempt("http://svc", 0);
        assert!(matches!(
            f.balancer.resolve(&mut state, None).await,
            Err(BalancerError::DataUnavailable(_))
        ));

        f.store.set_available(true);
        let mut state = attempt("http://svc", 0);
        assert_eq!(f.balancer.resolve(&mut state, None).await.unwrap().host, "h1");
    }

    #[tokio::test]
    async fn test_new_upstream_visible_after_index_invalidation() {
        let f = fixture(BalancerAlgorithm::RoundRobin);
        assert!(f.balancer.upstream_by_name("svc").await.unwrap().is_none());

        let up = add_upstream(&f.store, "svc", &[("h1:80", 1)]).await;
        assert!(f.balancer.upstream_by_name("svc").await.unwrap().is_none());

        f.balancer.invalidate_upstream(&UpstreamRef::from(&up));
        assert_eq!(f.balancer.upstream_by_name("SVC").await.unwrap().unwrap().id, up.id);
    }
}
