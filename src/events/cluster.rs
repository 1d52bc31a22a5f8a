//! Cluster-wide event transport.

use tokio::sync::broadcast;

/// A message delivered to every node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMessage {
    /// Node that published the message; it skips its own messages.
    pub origin_node: String,
    pub topic: String,
    pub payload: String,
}

/// Fire-and-forget, at-least-once delivery to all nodes.
pub trait ClusterTransport: Send + Sync {
    fn broadcast(&self, message: ClusterMessage);

    fn subscribe(&self) -> broadcast::Receiver<ClusterMessage>;
}

/// A cluster whose nodes all live in the current process.
///
/// Used for single-node deployments and for exercising multi-node
/// propagation in tests.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    tx: broadcast::Sender<ClusterMessage>,
}

impl InMemoryCluster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ClusterTransport for InMemoryCluster {
    fn broadcast(&self, message: ClusterMessage) {
        // No subscribers simply means no other node is listening.
        let _ = self.tx.send(message);
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterMessage> {
        self.tx.subscribe()
    }
}
