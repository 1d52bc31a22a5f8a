//! Per-worker key/value cache.
//!
//! # Responsibilities
//! - Hold the router version token, balancer pools and DNS answers
//! - Load values on miss through a caller-supplied loader
//! - Expire entries after their TTL (`FOREVER` = until invalidated)
//! - Propagate invalidations to the node and the cluster
//!
//! # Design Decisions
//! - Values are stored as `Arc<dyn Any>`; readers get an `Arc<T>` they can
//!   keep for the rest of a request even if the entry is dropped
//! - Loader errors are not cached
//! - Concurrent misses may both run the loader; the last insert wins

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::events::{Event, Publisher, CACHE_TOPIC, CLUSTER_CACHE_INVALIDATE, INVALIDATE};
use crate::observability::metrics;

pub mod keys;

/// TTL meaning "cache until explicitly invalidated".
pub const FOREVER: Duration = Duration::ZERO;

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A worker's cache.
pub struct Cache {
    entries: DashMap<String, Entry>,
    publisher: Option<Publisher>,
}

impl Cache {
    /// A cache whose `invalidate` reaches every worker and node.
    pub fn new(publisher: Publisher) -> Self {
        Self {
            entries: DashMap::new(),
            publisher: Some(publisher),
        }
    }

    /// A cache with no propagation; `invalidate` behaves as `invalidate_local`.
    pub fn detached() -> Self {
        Self {
            entries: DashMap::new(),
            publisher: None,
        }
    }

    /// Return the cached value for `key`, running `loader` on a miss.
    pub async fn get<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_with_ttl(key, || async move { loader().await.map(|value| (value, ttl)) })
            .await
    }

    /// Like [`Cache::get`], with the TTL chosen by the loader alongside the
    /// value it loaded.
    pub async fn get_with_ttl<T, E, F, Fut>(&self, key: &str, loader: F) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Duration), E>>,
    {
        if let Some(value) = self.peek::<T>(key) {
            return Ok(value);
        }

        tracing::trace!(key, "Cache miss");
        let (value, ttl) = loader().await?;
        let value = Arc::new(value);
        self.insert(key, value.clone(), ttl);
        Ok(value)
    }

    /// Return the cached value without loading.
    pub fn peek<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let (value, expired) = match self.entries.get(key) {
            Some(entry) => (entry.value.clone(), entry.is_expired()),
            None => return None,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
            return None;
        }

        match value.downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, "Cached value has unexpected type, ignoring");
                None
            }
        }
    }

    pub fn insert<T>(&self, key: &str, value: Arc<T>, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries.insert(key.to_string(), Entry { value, expires_at });
    }

    /// Drop `key` from this worker's cache only.
    pub fn invalidate_local(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        tracing::debug!(key, removed, "Cache key invalidated locally");
        metrics::record_cache_invalidation("local");
        removed
    }

    /// Drop `key` here, on every worker of this node and on every other node.
    pub fn invalidate(&self, key: &str) {
        self.invalidate_local(key);

        if let Some(publisher) = &self.publisher {
            publisher.publish_local(CACHE_TOPIC, INVALIDATE, Event::CacheInvalidate(key.to_string()));
            publisher.publish_cluster(CLUSTER_CACHE_INVALIDATE, key);
            metrics::record_cache_invalidation("cluster");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entries.len())
            .field("propagates", &self.publisher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClusterTransport, InMemoryCluster, NodeBus};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_loader_runs_only_on_miss() {
        let cache = Cache::detached();
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cache
                .get("k", FOREVER, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>("v".to_string())
                })
                .await
                .unwrap();
            assert_eq!(*v, "v");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_errors_are_not_cached() {
        let cache = Cache::detached();
        let res: Result<Arc<String>, &str> = cache.get("k", FOREVER, || async { Err("down") }).await;
        assert!(res.is_err());
        assert!(!cache.contains("k"));

        let v = cache
            .get("k", FOREVER, || async { Ok::<_, &str>("up".to_string()) })
            .await
            .unwrap();
        assert_eq!(*v, "up");
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = Cache::detached();
        cache.insert("k", Arc::new(1u32), Duration::from_millis(20));
        assert_eq!(cache.peek::<u32>("k").as_deref(), Some(&1));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.peek::<u32>("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidated_value_survives_for_holders() {
        let cache = Cache::detached();
        cache.insert("k", Arc::new(vec![1, 2, 3]), FOREVER);
        let held = cache.peek::<Vec<i32>>("k").unwrap();

        assert!(cache.invalidate_local("k"));
        assert!(!cache.invalidate_local("k"));
        assert_eq!(*held, vec![1, 2, 3]);
    }

    #[test]
    fn test_type_mismatch_is_a_miss() {
        let cache = Cache::detached();
        cache.insert("k", Arc::new(1u32), FOREVER);
        assert!(cache.peek::<String>("k").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_publishes_to_node_and_cluster() {
        let bus = NodeBus::default();
        let cluster = Arc::new(InMemoryCluster::default());
        let mut node_rx = bus.subscribe();
        let mut cluster_rx = cluster.subscribe();
        let transport: Arc<dyn ClusterTransport> = cluster.clone();

        let cache = Cache::new(Publisher::new("n1", 0, bus, transport));
        cache.insert("k", Arc::new(1u32), FOREVER);
        cache.invalidate("k");

        assert!(!cache.contains("k"));
        let local = node_rx.recv().await.unwrap();
        assert_eq!(local.channel, "cache.invalidate");
        assert!(matches!(local.event, Event::CacheInvalidate(ref k) if k == "k"));

        let remote = cluster_rx.recv().await.unwrap();
        assert_eq!(remote.topic, CLUSTER_CACHE_INVALIDATE);
        assert_eq!(remote.payload, "k");
        assert_eq!(remote.origin_node, "n1");
    }
}
