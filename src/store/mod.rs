//! Data-access subsystem.
//!
//! # Data Flow
//! ```text
//! Admin API / declarative config
//!     → dao.rs (write + emit "dao.crud" on the mutating worker)
//!     → DataStore (memory.rs)
//!
//! Router rebuild / balancer pool load
//!     → DataStore::list_routes / list_upstreams / list_targets
//! ```
//!
//! # Design Decisions
//! - Storage sits behind an async trait; the core never sees the backend
//! - Every mutation goes through the Dao so it always produces an event
//! - Reads never emit events

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod dao;
pub mod declarative;
pub mod entities;
pub mod memory;

pub use dao::Dao;
pub use entities::{Entity, EntityCacheKey, EntityKind, Operation, Route, Sni, Target, Upstream};
pub use memory::MemoryStore;

/// Errors surfaced by the data-access layer.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backing storage cannot be read or written.
    #[error("data store unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    /// The record failed validation or violates a constraint.
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: EntityKind, reason: String },
}

/// Storage of route, upstream, target and SNI records.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn list_routes(&self) -> Result<Vec<Route>, StoreError>;

    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError>;

    /// All target records of an upstream, oldest first.
    async fn list_targets(&self, upstream_id: &Uuid) -> Result<Vec<Target>, StoreError>;

    async fn list_snis(&self) -> Result<Vec<Sni>, StoreError>;

    /// Insert or replace a record, returning the previous version.
    async fn upsert(&self, entity: Entity) -> Result<Option<Entity>, StoreError>;

    /// Remove a record, returning it if it existed.
    async fn delete(&self, kind: EntityKind, id: &Uuid) -> Result<Option<Entity>, StoreError>;
}
