//! A gateway node: a set of workers sharing one node bus.
//!
//! # Data Flow
//! ```text
//! Node::start
//!     → one NodeBus for the node
//!     → N workers (cache, router, balancer, events each)
//!     → one event pump task per worker
//!
//! request → next_worker() (round-robin) → Worker::route / Worker::resolve
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::events::{ClusterTransport, NodeBus};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::worker::Worker;
use crate::load_balancer::{Resolver, SystemResolver};
use crate::store::DataStore;

#[derive(Debug)]
pub struct Node {
    id: String,
    workers: Vec<Arc<Worker>>,
    next: AtomicUsize,
    shutdown: Shutdown,
}

impl Node {
    /// Start a node with the system DNS resolver. Must run inside a Tokio runtime.
    pub fn start(
        config: &GatewayConfig,
        store: Arc<dyn DataStore>,
        cluster: Arc<dyn ClusterTransport>,
    ) -> Arc<Self> {
        Self::start_with_resolver(config, store, cluster, Arc::new(SystemResolver::new()))
    }

    pub fn start_with_resolver(
        config: &GatewayConfig,
        store: Arc<dyn DataStore>,
        cluster: Arc<dyn ClusterTransport>,
        resolver: Arc<dyn Resolver>,
    ) -> Arc<Self> {
        let id = if config.node.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            config.node.id.clone()
        };
        let bus = NodeBus::default();
        let shutdown = Shutdown::new();

        let workers: Vec<Arc<Worker>> = (0..config.node.workers.max(1))
            .map(|i| {
                let worker = Worker::new(
                    &id,
                    i,
                    config,
                    bus.clone(),
                    cluster.clone(),
                    store.clone(),
                    resolver.clone(),
                );
                worker.events().spawn(shutdown.subscribe());
                Arc::new(worker)
            })
            .collect();

        tracing::info!(node = %id, workers = workers.len(), "Node started");

        Arc::new(Self {
            id,
            workers,
            next: AtomicUsize::new(0),
            shutdown,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Worker for the next request, round-robin.
    pub fn next_worker(&self) -> &Arc<Worker> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[i]
    }

    /// Stop the workers' event pumps.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        tracing::info!(node = %self.id, "Node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys;
    use crate::events::InMemoryCluster;
    use crate::store::{Entity, MemoryStore, Route};
    use std::time::Duration;
    use url::Url;

    fn config(id: &str, workers: usize) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.node.id = id.into();
        config.node.workers = workers;
        config
    }

    #[tokio::test]
    async fn test_next_worker_rotates() {
        let node = Node::start(
            &config("n1", 3),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryCluster::default()),
        );
        let ids: Vec<_> = (0..4).map(|_| node.next_worker().id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0]);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_generated_node_id_when_unset() {
        let node = Node::start(
            &config("", 1),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryCluster::default()),
        );
        assert!(Uuid::parse_str(node.id()).is_ok());
        node.shutdown();
    }

    #[tokio::test]
    async fn test_route_change_reaches_sibling_workers() {
        let node = Node::start(
            &config("n1", 2),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryCluster::default()),
        );
        let sibling = node.workers()[1].clone();
        let before = sibling.current_version().await;

        let route = Route::new(Url::parse("http://10.0.0.1").unwrap());
        node.workers()[0].dao().save(Entity::Route(route)).await.unwrap();

        let mut dropped = false;
        for _ in 0..200 {
            if !sibling.cache().contains(keys::ROUTER_VERSION) {
                dropped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(dropped);
        assert_ne!(before, sibling.current_version().await);
        node.shutdown();
    }
}
