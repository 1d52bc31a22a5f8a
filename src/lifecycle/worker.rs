//! One worker of a node.
//!
//! A worker owns its cache, router state, balancer and event hub. Nothing in
//! it is shared with other workers; they only talk through events.

use std::sync::Arc;

use uuid::Uuid;

use crate::cache::{keys, Cache, FOREVER};
use crate::config::GatewayConfig;
use crate::events::{ClusterTransport, NodeBus, Publisher, WorkerEvents};
use crate::invalidation::InvalidationCoordinator;
use crate::lifecycle::request::{GatewayError, RoutedRequest};
use crate::load_balancer::{AttemptOutcome, AttemptState, Balancer, BalancerError, ResolvedAddress, Resolver};
use crate::routing::{CompileOptions, RequestContext, RouterState};
use crate::store::{Dao, DataStore};

pub struct Worker {
    id: usize,
    cache: Arc<Cache>,
    events: Arc<WorkerEvents>,
    router: RouterState,
    balancer: Arc<Balancer>,
    dao: Dao,
    store: Arc<dyn DataStore>,
}

impl Worker {
    /// Build a worker and register its invalidation handlers.
    ///
    /// The event pump is not started; see `WorkerEvents::spawn`.
    pub fn new(
        node_id: &str,
        id: usize,
        config: &GatewayConfig,
        bus: NodeBus,
        cluster: Arc<dyn ClusterTransport>,
        store: Arc<dyn DataStore>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let publisher = Publisher::new(node_id, id, bus, cluster);
        let events = WorkerEvents::new(publisher.clone());
        let cache = Arc::new(Cache::new(publisher));
        let balancer = Arc::new(Balancer::new(
            cache.clone(),
            store.clone(),
            resolver,
            &config.balancer,
        ));

        InvalidationCoordinator::new(cache.clone(), balancer.clone()).register(&events);

        Self {
            id,
            router: RouterState::new(CompileOptions {
                reject_ambiguous: config.router.reject_ambiguous,
            }),
            dao: Dao::new(store.clone(), events.clone()),
            cache,
            events,
            balancer,
            store,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn events(&self) -> &Arc<WorkerEvents> {
        &self.events
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    pub fn router(&self) -> &RouterState {
        &self.router
    }

    /// Data access bound to this worker's event hub.
    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    /// The router version token, minting a new one if it was invalidated.
    pub async fn current_version(&self) -> String {
        let token = self
            .cache
            .get(keys::ROUTER_VERSION, FOREVER, || async {
                Ok::<_, std::convert::Infallible>(Uuid::new_v4().to_string())
            })
            .await;
        match token {
            Ok(token) => token.as_ref().clone(),
            Err(never) => match never {},
        }
    }

    /// Find the route for a request and prepare its balancer state.
    pub async fn route(&self, ctx: &RequestContext) -> Result<RoutedRequest, GatewayError> {
        let version = self.current_version().await;
        let snapshot = self
            .router
            .ensure_fresh(&version, self.store.as_ref())
            .await
            .ok_or(GatewayError::NoRouter)?;

        let matched = snapshot.find(ctx).ok_or(GatewayError::NoRoute)?;
        let route = &matched.route;

        if route.https_only && !ctx.is_https(route.http_if_terminated) {
            tracing::debug!(route = %route.display_name(), "Plaintext request to https-only route");
            return Err(GatewayError::HttpsRequired);
        }

        let attempt = AttemptState::for_route(route).ok_or_else(|| GatewayError::InvalidUpstream {
            route: route.display_name(),
        })?;

        Ok(RoutedRequest {
            matched,
            snapshot,
            attempt,
        })
    }

    /// Address for the next attempt; `previous` is how the last one ended.
    pub async fn resolve(
        &self,
        attempt: &mut AttemptState,
        previous: Option<AttemptOutcome>,
    ) -> Result<ResolvedAddress, BalancerError> {
        self.balancer.resolve(attempt, previous).await
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("cache", &self.cache)
            .field("router", &self.router)
            .field("balancer", &self.balancer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryCluster;
    use crate::load_balancer::SystemResolver;
    use crate::store::{Entity, MemoryStore, Route};
    use axum::http::{HeaderMap, HeaderValue, Method, Uri};
    use url::Url;

    fn worker(store: Arc<MemoryStore>) -> Worker {
        Worker::new(
            "n1",
            0,
            &GatewayConfig::default(),
            NodeBus::default(),
            Arc::new(InMemoryCluster::default()),
            store,
            Arc::new(SystemResolver::new()),
        )
    }

    fn ctx(host: &str, path: &str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(host).unwrap());
        RequestContext::new(Method::GET, path.parse::<Uri>().unwrap(), headers)
    }

    #[tokio::test]
    async fn test_version_token_is_stable_until_invalidated() {
        let w = worker(Arc::new(MemoryStore::new()));
        let first = w.current_version().await;
        assert_eq!(first, w.current_version().await);

        w.cache().invalidate_local(keys::ROUTER_VERSION);
        assert_ne!(first, w.current_version().await);
    }

    #[tokio::test]
    async fn test_route_picks_up_dao_changes() {
        let w = worker(Arc::new(MemoryStore::new()));
        assert!(matches!(w.route(&ctx("a.test", "/")).await, Err(GatewayError::NoRoute)));

        let mut route = Route::new(Url::parse("http://10.0.0.1:9000").unwrap());
        route.hosts = vec!["a.test".into()];
        w.dao().save(Entity::Route(route.clone())).await.unwrap();

        let routed = w.route(&ctx("a.test", "/")).await.unwrap();
        assert_eq!(routed.matched.route.id, route.id);
        assert_eq!(routed.attempt.target.port, 9000);
    }

    #[tokio::test]
    async fn test_https_only_rejects_plaintext() {
        let store = Arc::new(MemoryStore::new());
        let mut route = Route::new(Url::parse("http://10.0.0.1").unwrap());
        route.https_only = true;
        route.http_if_terminated = true;
        store.upsert(Entity::Route(route)).await.unwrap();
        let w = worker(store);

        let err = w.route(&ctx("a.test", "/")).await.unwrap_err();
        assert!(matches!(err, GatewayError::HttpsRequired));

        let mut terminated = ctx("a.test", "/");
        terminated
            .headers
            .insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert!(w.route(&terminated).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_outage_before_first_build_is_no_router() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let w = worker(store.clone());
        assert!(matches!(w.route(&ctx("a.test", "/")).await, Err(GatewayError::NoRouter)));

        store.set_available(true);
        assert!(matches!(w.route(&ctx("a.test", "/")).await, Err(GatewayError::NoRoute)));
    }
}
