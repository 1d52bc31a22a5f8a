//! Worker event hub.
//!
//! # Responsibilities
//! - Deliver events to handlers of the current worker (`post_local`)
//! - Fan events out to every worker of the node (`publish_local`)
//! - Fan events out to every other node (`publish_cluster`)
//! - Pump node and cluster messages into local handlers
//!
//! # Design Decisions
//! - Delivery is fire-and-forget; a publish never waits for handlers
//! - Handlers are synchronous; they only touch worker-local state
//! - The handler table is cloned out before dispatch so handlers may publish

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::events::cluster::{ClusterMessage, ClusterTransport};
use crate::events::payload::Event;
use crate::observability::metrics;

/// Handler for local (worker and node) channels.
pub type LocalHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handler for cluster topics; receives the raw wire payload.
pub type ClusterHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Channel name for a topic/subtopic pair, e.g. `crud.routes`.
pub fn channel(topic: &str, subtopic: &str) -> String {
    format!("{}.{}", topic, subtopic)
}

/// A message fanned out to every worker of a node.
#[derive(Debug, Clone)]
pub struct LocalMessage {
    pub origin_worker: usize,
    pub channel: String,
    pub event: Event,
}

/// Node-wide broadcast shared by all workers of one node.
#[derive(Debug, Clone)]
pub struct NodeBus {
    tx: broadcast::Sender<LocalMessage>,
}

impl NodeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalMessage> {
        self.tx.subscribe()
    }
}

impl Default for NodeBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Publishing half of the event bus.
///
/// Holds no handlers, so components that only publish (the cache) can keep
/// one without creating reference cycles with the handlers that use them.
#[derive(Clone)]
pub struct Publisher {
    node_id: Arc<str>,
    worker_id: usize,
    node: NodeBus,
    cluster: Arc<dyn ClusterTransport>,
}

impl Publisher {
    pub fn new(
        node_id: impl Into<Arc<str>>,
        worker_id: usize,
        node: NodeBus,
        cluster: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            worker_id,
            node,
            cluster,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Deliver to every worker of this node, including the caller.
    pub fn publish_local(&self, topic: &str, subtopic: &str, event: Event) {
        let message = LocalMessage {
            origin_worker: self.worker_id,
            channel: channel(topic, subtopic),
            event,
        };
        if self.node.tx.send(message).is_err() {
            tracing::debug!(topic, subtopic, "No workers subscribed to node bus");
        }
    }

    /// Deliver to every other node of the cluster.
    pub fn publish_cluster(&self, topic: &str, payload: impl Into<String>) {
        self.cluster.broadcast(ClusterMessage {
            origin_node: self.node_id.to_string(),
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }
}

/// Event hub of a single worker.
pub struct WorkerEvents {
    publisher: Publisher,
    local: DashMap<String, Vec<LocalHandler>>,
    cluster: DashMap<String, Vec<ClusterHandler>>,
}

impl WorkerEvents {
    pub fn new(publisher: Publisher) -> Arc<Self> {
        Arc::new(Self {
            publisher,
            local: DashMap::new(),
            cluster: DashMap::new(),
        })
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscribe_local<F>(&self, topic: &str, subtopic: &str, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.local
            .entry(channel(topic, subtopic))
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn subscribe_cluster<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.cluster
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Deliver to this worker's handlers only, synchronously.
    pub fn post_local(&self, topic: &str, subtopic: &str, event: Event) -> usize {
        self.dispatch_local(&channel(topic, subtopic), &event)
    }

    pub fn publish_local(&self, topic: &str, subtopic: &str, event: Event) {
        self.publisher.publish_local(topic, subtopic, event);
    }

    pub fn publish_cluster(&self, topic: &str, payload: impl Into<String>) {
        self.publisher.publish_cluster(topic, payload);
    }

    fn dispatch_local(&self, channel: &str, event: &Event) -> usize {
        let handlers = match self.local.get(channel) {
            Some(handlers) => handlers.value().clone(),
            None => {
                tracing::trace!(channel, "No local handlers");
                return 0;
            }
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    fn dispatch_cluster(&self, topic: &str, payload: &str) -> usize {
        let handlers = match self.cluster.get(topic) {
            Some(handlers) => handlers.value().clone(),
            None => return 0,
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Start pumping node and cluster messages into this worker's handlers.
    ///
    /// Subscriptions are taken before the task is spawned, so nothing
    /// published after this call returns is missed.
    pub fn spawn(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut node_rx = self.publisher.node.subscribe();
        let mut cluster_rx = self.publisher.cluster.subscribe();
        let events = Arc::clone(self);

        tokio::spawn(async move {
            let node_id = events.publisher.node_id().to_string();
            let worker_id = events.publisher.worker_id();
            tracing::debug!(node = %node_id, worker = worker_id, "Worker event pump started");

            loop {
                tokio::select! {
                    msg = node_rx.recv() => match msg {
                        Ok(msg) => {
                            events.dispatch_local(&msg.channel, &msg.event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(worker = worker_id, skipped, "Node bus lagged, events dropped");
                            metrics::record_event_dropped("lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    msg = cluster_rx.recv() => match msg {
                        Ok(msg) if msg.origin_node == node_id => {}
                        Ok(msg) => {
                            events.dispatch_cluster(&msg.topic, &msg.payload);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(worker = worker_id, skipped, "Cluster transport lagged, events dropped");
                            metrics::record_event_dropped("lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.recv() => {
                        tracing::debug!(worker = worker_id, "Worker event pump stopping");
                        break;
                    }
                }
            }
        })
    }
}
