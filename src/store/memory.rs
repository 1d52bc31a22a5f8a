//! In-memory data store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::store::{DataStore, Entity, EntityKind, Route, Sni, StoreError, Target, Upstream};

/// A thread-safe store backed by `DashMap`s, one per entity kind.
///
/// `set_available(false)` makes every call fail with `Unavailable`, which is
/// how outages of a real backend are simulated.
#[derive(Debug, Default)]
pub struct MemoryStore {
    routes: DashMap<Uuid, Route>,
    upstreams: DashMap<Uuid, Upstream>,
    targets: DashMap<Uuid, Target>,
    snis: DashMap<Uuid, Sni>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn check_constraints(&self, entity: &Entity) -> Result<(), StoreError> {
        let invalid = |reason: String| StoreError::Invalid {
            kind: entity.kind(),
            reason,
        };

        entity.validate().map_err(invalid)?;

        match entity {
            Entity::Upstream(upstream) => {
                let clash = self
                    .upstreams
                    .iter()
                    .any(|u| u.name == upstream.name && u.id != upstream.id);
                if clash {
                    return Err(invalid(format!("upstream name '{}' already exists", upstream.name)));
                }
            }
            Entity::Target(target) => {
                if !self.upstreams.contains_key(&target.upstream_id) {
                    return Err(invalid(format!("upstream {} does not exist", target.upstream_id)));
                }
            }
            Entity::Sni(sni) => {
                let clash = self.snis.iter().any(|s| s.name == sni.name && s.id != sni.id);
                if clash {
                    return Err(invalid(format!("sni '{}' already exists", sni.name)));
                }
            }
            Entity::Route(_) => {}
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn list_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.check_available()?;
        let mut routes: Vec<Route> = self.routes.iter().map(|r| r.value().clone()).collect();
        routes.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(routes)
    }

    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError> {
        self.check_available()?;
        let mut upstreams: Vec<Upstream> = self.upstreams.iter().map(|r| r.value().clone()).collect();
        upstreams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(upstreams)
    }

    async fn list_targets(&self, upstream_id: &Uuid) -> Result<Vec<Target>, StoreError> {
        self.check_available()?;
        let mut targets: Vec<Target> = self
            .targets
            .iter()
            .filter(|t| t.upstream_id == *upstream_id)
            .map(|t| t.value().clone())
            .collect();
        targets.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(targets)
    }

    async fn list_snis(&self) -> Result<Vec<Sni>, StoreError> {
        self.check_available()?;
        let mut snis: Vec<Sni> = self.snis.iter().map(|s| s.value().clone()).collect();
        snis.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snis)
    }

    async fn upsert(&self, entity: Entity) -> Result<Option<Entity>, StoreError> {
        self.check_available()?;
        self.check_constraints(&entity)?;

        let previous = match entity {
            Entity::Route(r) => self.routes.insert(r.id, r).map(Entity::Route),
            Entity::Upstream(u) => self.upstreams.insert(u.id, u).map(Entity::Upstream),
            Entity::Target(t) => self.targets.insert(t.id, t).map(Entity::Target),
            Entity::Sni(s) => self.snis.insert(s.id, s).map(Entity::Sni),
        };
        Ok(previous)
    }

    async fn delete(&self, kind: EntityKind, id: &Uuid) -> Result<Option<Entity>, StoreError> {
        self.check_available()?;

        let removed = match kind {
            EntityKind::Routes => self.routes.remove(id).map(|(_, r)| Entity::Route(r)),
            EntityKind::Upstreams => {
                let removed = self.upstreams.remove(id).map(|(_, u)| Entity::Upstream(u));
                if removed.is_some() {
                    self.targets.retain(|_, t| t.upstream_id != *id);
                }
                removed
            }
            EntityKind::Targets => self.targets.remove(id).map(|(_, t)| Entity::Target(t)),
            EntityKind::Snis => self.snis.remove(id).map(|(_, s)| Entity::Sni(s)),
        };
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn test_upsert_returns_previous() {
        let store = MemoryStore::new();
        let mut upstream = Upstream::new("svc");

        let prev = store.upsert(Entity::Upstream(upstream.clone())).await.unwrap();
        assert!(prev.is_none());

        upstream.name = "svc2".into();
        let prev = store.upsert(Entity::Upstream(upstream.clone())).await.unwrap();
        match prev {
            Some(Entity::Upstream(old)) => assert_eq!(old.name, "svc"),
            other => panic!("unexpected previous: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_target_requires_upstream() {
        let store = MemoryStore::new();
        let err = store
            .upsert(Entity::Target(Target::new(Uuid::new_v4(), "h1:80", 10)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid { kind: EntityKind::Targets, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_upstream_name_rejected() {
        let store = MemoryStore::new();
        store.upsert(Entity::Upstream(Upstream::new("svc"))).await.unwrap();
        let err = store.upsert(Entity::Upstream(Upstream::new("svc"))).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_delete_upstream_cascades_targets() {
        let store = MemoryStore::new();
        let upstream = Upstream::new("svc");
        store.upsert(Entity::Upstream(upstream.clone())).await.unwrap();
        store
            .upsert(Entity::Target(Target::new(upstream.id, "h1:80", 10)))
            .await
            .unwrap();

        store.delete(EntityKind::Upstreams, &upstream.id).await.unwrap();
        assert!(store.list_targets(&upstream.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = MemoryStore::new();
        store
            .upsert(Entity::Route(Route::new(Url::parse("http://svc").unwrap())))
            .await
            .unwrap();

        store.set_available(false);
        assert!(matches!(store.list_routes().await, Err(StoreError::Unavailable(_))));

        store.set_available(true);
        assert_eq!(store.list_routes().await.unwrap().len(), 1);
    }
}
