//! Event bus subsystem.
//!
//! # Data Flow
//! ```text
//! Dao mutation
//!     → post_local("dao", "crud", Raw)          (mutating worker only)
//!     → invalidation coordinator decodes, re-posts "crud.<kind>"
//!
//! Upstream change
//!     → publish_local("balancer", "invalidate")  (every worker of the node)
//!     → publish_cluster("balancer:invalidate")   (every other node)
//! ```
//!
//! # Design Decisions
//! - Two scopes only: node-local broadcast and cluster broadcast
//! - At-least-once, unordered across subscribers, fire-and-forget
//! - Payloads are decoded at the boundary into closed enums (payload.rs)

pub mod bus;
pub mod cluster;
pub mod payload;

pub use bus::{NodeBus, Publisher, WorkerEvents};
pub use cluster::{ClusterMessage, ClusterTransport, InMemoryCluster};
pub use payload::{Event, InvalidationEvent, MalformedEvent, UpstreamRef};

/// Raw entity changes posted by the data-access layer.
pub const DAO_TOPIC: &str = "dao";
pub const DAO_CRUD: &str = "crud";

/// Decoded entity changes: `crud.<kind>` and `crud.<kind>.<operation>`.
pub const CRUD_TOPIC: &str = "crud";

/// Node-local balancer invalidation: `balancer.invalidate`.
pub const BALANCER_TOPIC: &str = "balancer";
pub const INVALIDATE: &str = "invalidate";

/// Cluster balancer invalidation, payload `"<upstream_id>:<upstream_name>"`.
pub const CLUSTER_BALANCER_INVALIDATE: &str = "balancer:invalidate";

/// Node-local cache key invalidation: `cache.invalidate`.
pub const CACHE_TOPIC: &str = "cache";

/// Cluster cache key invalidation, payload is the key.
pub const CLUSTER_CACHE_INVALIDATE: &str = "cache:invalidate";
