//! Declarative configuration sync.
//!
//! Routes and upstreams listed in the config file are identified by name and
//! written through the Dao, so a config reload produces the same events as
//! the equivalent admin edits.
//!
//! - A declared route or upstream is created if absent, updated if changed
//! - A name present in the previous config but not the next is deleted
//! - Targets of a declared upstream are owned by the config: a missing or
//!   reweighted target gets a new record, an undeclared one gets weight 0

use std::collections::{HashMap, HashSet};

use url::Url;

use crate::config::schema::{GatewayConfig, RouteConfig, UpstreamConfig};
use crate::store::entities::{parse_host_port, DEFAULT_TARGET_PORT};
use crate::store::{Dao, Entity, EntityKind, Route, StoreError, Target, Upstream};

/// Counts of writes performed by one sync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Bring the store in line with `next`.
///
/// `previous` is the config the last sync applied, used to find declarative
/// entities that were removed. Records created through the admin API under
/// other names are left alone.
pub async fn sync(
    dao: &Dao,
    previous: Option<&GatewayConfig>,
    next: &GatewayConfig,
) -> Result<SyncReport, StoreError> {
    let mut report = SyncReport::default();

    sync_upstreams(dao, previous, next, &mut report).await?;
    sync_routes(dao, previous, next, &mut report).await?;

    tracing::info!(
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        "Declarative config synced"
    );
    Ok(report)
}

async fn sync_routes(
    dao: &Dao,
    previous: Option<&GatewayConfig>,
    next: &GatewayConfig,
    report: &mut SyncReport,
) -> Result<(), StoreError> {
    let existing: HashMap<String, Route> = dao
        .store()
        .list_routes()
        .await?
        .into_iter()
        .filter_map(|r| r.name.clone().map(|name| (name, r)))
        .collect();

    for config in &next.routes {
        let mut route = route_from_config(config)?;
        match existing.get(&config.name) {
            Some(current) => {
                route.id = current.id;
                route.created_at = current.created_at;
                if route != *current {
                    dao.save(Entity::Route(route)).await?;
                    report.updated += 1;
                }
            }
            None => {
                dao.save(Entity::Route(route)).await?;
                report.created += 1;
            }
        }
    }

    let declared: HashSet<&str> = next.routes.iter().map(|r| r.name.as_str()).collect();
    for removed in previous.into_iter().flat_map(|p| &p.routes) {
        if declared.contains(removed.name.as_str()) {
            continue;
        }
        if let Some(route) = existing.get(&removed.name) {
            dao.delete(EntityKind::Routes, &route.id).await?;
            report.deleted += 1;
        }
    }
    Ok(())
}

async fn sync_upstreams(
    dao: &Dao,
    previous: Option<&GatewayConfig>,
    next: &GatewayConfig,
    report: &mut SyncReport,
) -> Result<(), StoreError> {
    let existing: HashMap<String, Upstream> = dao
        .store()
        .list_upstreams()
        .await?
        .into_iter()
        .map(|u| (u.name.clone(), u))
        .collect();

    for config in &next.upstreams {
        let upstream = match existing.get(&config.name) {
            Some(upstream) => upstream.clone(),
            None => {
                let upstream = Upstream::new(config.name.clone());
                dao.save(Entity::Upstream(upstream.clone())).await?;
                report.created += 1;
                upstream
            }
        };
        sync_targets(dao, &upstream, config, report).await?;
    }

    let declared: HashSet<&str> = next.upstreams.iter().map(|u| u.name.as_str()).collect();
    for removed in previous.into_iter().flat_map(|p| &p.upstreams) {
        if declared.contains(removed.name.as_str()) {
            continue;
        }
        if let Some(upstream) = existing.get(&removed.name) {
            dao.delete(EntityKind::Upstreams, &upstream.id).await?;
            report.deleted += 1;
        }
    }
    Ok(())
}

async fn sync_targets(
    dao: &Dao,
    upstream: &Upstream,
    config: &UpstreamConfig,
    report: &mut SyncReport,
) -> Result<(), StoreError> {
    // Records come oldest first, so the last one per address is current.
    let mut current: HashMap<(String, u16), u32> = HashMap::new();
    for target in dao.store().list_targets(&upstream.id).await? {
        if let Some(addr) = target.host_port() {
            current.insert(addr, target.weight);
        }
    }

    let mut declared = HashSet::new();
    for target in &config.targets {
        let addr = parse_host_port(&target.target, DEFAULT_TARGET_PORT).ok_or_else(|| {
            StoreError::Invalid {
                kind: EntityKind::Targets,
                reason: format!("invalid target '{}'", target.target),
            }
        })?;
        if current.get(&addr) != Some(&target.weight) {
            let record = Target::new(upstream.id, target.target.clone(), target.weight);
            dao.save(Entity::Target(record)).await?;
            report.created += 1;
        }
        declared.insert(addr);
    }

    for ((host, port), weight) in current {
        if weight == 0 || declared.contains(&(host.clone(), port)) {
            continue;
        }
        let address = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        dao.save(Entity::Target(Target::new(upstream.id, address, 0))).await?;
        report.created += 1;
    }
    Ok(())
}

/// Build a Route record from its declarative form.
pub fn route_from_config(config: &RouteConfig) -> Result<Route, StoreError> {
    let upstream_url = Url::parse(&config.upstream_url).map_err(|e| StoreError::Invalid {
        kind: EntityKind::Routes,
        reason: format!("upstream_url: {}", e),
    })?;

    let mut route = Route::new(upstream_url);
    route.name = Some(config.name.clone());
    route.hosts = config.hosts.clone();
    route.paths = config.paths.clone();
    route.methods = config.methods.clone();
    route.headers = config.headers.clone();
    route.https_only = config.https_only;
    route.http_if_terminated = config.http_if_terminated;
    route.strip_path = config.strip_path;
    route.preserve_host = config.preserve_host;
    route.connect_timeout = config.connect_timeout_ms;
    route.send_timeout = config.send_timeout_ms;
    route.read_timeout = config.read_timeout_ms;
    route.retries = config.retries;
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClusterTransport, InMemoryCluster, NodeBus, Publisher, WorkerEvents};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn dao() -> Dao {
        let cluster: Arc<dyn ClusterTransport> = Arc::new(InMemoryCluster::default());
        let events = WorkerEvents::new(Publisher::new("n1", 0, NodeBus::default(), cluster));
        Dao::new(Arc::new(MemoryStore::new()), events)
    }

    fn config(toml: &str) -> GatewayConfig {
        toml::from_str(toml).unwrap()
    }

    const BASE: &str = r#"
        [[routes]]
        name = "users"
        paths = ["/users"]
        upstream_url = "http://users"

        [[upstreams]]
        name = "users"
        targets = [{ target = "h1:80", weight = 10 }, { target = "h2:80", weight = 10 }]
    "#;

    #[tokio::test]
    async fn test_initial_sync_creates_everything() {
        let dao = dao();
        let report = sync(&dao, None, &config(BASE)).await.unwrap();
        assert_eq!(report, SyncReport { created: 4, updated: 0, deleted: 0 });

        let routes = dao.store().list_routes().await.unwrap();
        assert_eq!(routes[0].name.as_deref(), Some("users"));
    }

    #[tokio::test]
    async fn test_resync_of_same_config_is_noop() {
        let dao = dao();
        let base = config(BASE);
        sync(&dao, None, &base).await.unwrap();

        let report = sync(&dao, Some(&base), &base).await.unwrap();
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn test_route_edit_keeps_identity() {
        let dao = dao();
        let base = config(BASE);
        sync(&dao, None, &base).await.unwrap();
        let before = dao.store().list_routes().await.unwrap().remove(0);

        let mut next = base.clone();
        next.routes[0].retries = 1;
        let report = sync(&dao, Some(&base), &next).await.unwrap();
        assert_eq!(report.updated, 1);

        let after = dao.store().list_routes().await.unwrap().remove(0);
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.retries, 1);
    }

    #[tokio::test]
    async fn test_removed_target_is_disabled_and_removed_route_deleted() {
        let dao = dao();
        let base = config(BASE);
        sync(&dao, None, &base).await.unwrap();

        let mut next = base.clone();
        next.routes.clear();
        next.upstreams[0].targets.truncate(1);
        let report = sync(&dao, Some(&base), &next).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created, 1);

        assert!(dao.store().list_routes().await.unwrap().is_empty());
        let upstream = dao.store().list_upstreams().await.unwrap().remove(0);
        let targets = dao.store().list_targets(&upstream.id).await.unwrap();
        let last = targets.last().unwrap();
        assert_eq!(last.target, "h2:80");
        assert_eq!(last.weight, 0);
    }
}
