//! Data-access object: the only write path into the store.
//!
//! Every successful mutation posts a raw `dao.crud` event to the handlers of
//! the worker that performed it. The invalidation coordinator takes it from
//! there.

use std::sync::Arc;

use uuid::Uuid;

use crate::events::{Event, InvalidationEvent, WorkerEvents, DAO_CRUD, DAO_TOPIC};
use crate::store::{DataStore, Entity, EntityKind, Operation, StoreError};

#[derive(Clone)]
pub struct Dao {
    store: Arc<dyn DataStore>,
    events: Arc<WorkerEvents>,
}

impl Dao {
    pub fn new(store: Arc<dyn DataStore>, events: Arc<WorkerEvents>) -> Self {
        Self { store, events }
    }

    /// Read access for callers that never mutate.
    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Insert or replace `entity`, returning the stored version.
    pub async fn save(&self, entity: Entity) -> Result<Entity, StoreError> {
        let previous = self.store.upsert(entity.clone()).await?;
        let operation = if previous.is_some() {
            Operation::Update
        } else {
            Operation::Create
        };

        self.emit(operation, entity.clone(), previous);
        Ok(entity)
    }

    /// Remove the record `id` of `kind`, returning it.
    pub async fn delete(&self, kind: EntityKind, id: &Uuid) -> Result<Entity, StoreError> {
        let removed = self
            .store
            .delete(kind, id)
            .await?
            .ok_or(StoreError::NotFound { kind, id: *id })?;

        self.emit(Operation::Delete, removed.clone(), None);
        Ok(removed)
    }

    fn emit(&self, operation: Operation, entity: Entity, previous: Option<Entity>) {
        let kind = entity.kind();
        let id = entity.id();
        let payload = InvalidationEvent::new(operation, entity, previous).encode();

        let delivered = self.events.post_local(DAO_TOPIC, DAO_CRUD, Event::Raw(payload));
        tracing::debug!(%kind, %id, %operation, delivered, "Entity changed");
    }
}

impl std::fmt::Debug for Dao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao").finish_non_exhaustive()
    }
}
