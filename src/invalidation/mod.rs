//! Invalidation coordinator.
//!
//! # Data Flow
//! ```text
//! dao.crud (raw, mutating worker only)
//!     → decode InvalidationEvent (malformed → logged, dropped)
//!     → cache.invalidate(entity cache keys)      local + node + cluster
//!     → post crud.<kind> and crud.<kind>.<operation>
//!
//! crud.routes     → invalidate_local("router:version")
//! crud.targets    → drop local pool of the owning upstream
//! crud.upstreams  → drop local pool + name index (old and new identity)
//!                   → publish_local  balancer.invalidate  {id, name}
//!                   → publish_cluster balancer:invalidate "<id>:<name>"
//! crud.snis       → cache.invalidate(pem / parsed certificate keys)
//!
//! balancer.invalidate / balancer:invalidate → drop local pool + name index
//! cache.invalidate / cache:invalidate       → invalidate_local(key)
//! ```
//!
//! # Design Decisions
//! - Every handler only touches the state of the worker it runs on
//! - Propagation is fire-and-forget; workers converge lazily on their next
//!   request, never through a background refresh
//! - Handlers keep a weak reference to the event hub so the hub does not
//!   own itself through its own handler table

use std::sync::{Arc, Weak};

use crate::cache::{keys, Cache};
use crate::events::bus::channel;
use crate::events::{
    Event, InvalidationEvent, MalformedEvent, UpstreamRef, WorkerEvents, BALANCER_TOPIC, CACHE_TOPIC,
    CLUSTER_BALANCER_INVALIDATE, CLUSTER_CACHE_INVALIDATE, CRUD_TOPIC, DAO_CRUD, DAO_TOPIC, INVALIDATE,
};
use crate::load_balancer::Balancer;
use crate::observability::metrics;
use crate::store::EntityKind;

/// Binds entity changes to cache invalidations on one worker.
#[derive(Debug)]
pub struct InvalidationCoordinator {
    cache: Arc<Cache>,
    balancer: Arc<Balancer>,
}

impl InvalidationCoordinator {
    pub fn new(cache: Arc<Cache>, balancer: Arc<Balancer>) -> Arc<Self> {
        Arc::new(Self { cache, balancer })
    }

    /// Subscribe every handler on `events`.
    pub fn register(self: &Arc<Self>, events: &Arc<WorkerEvents>) {
        let this = Arc::clone(self);
        let hub = Arc::downgrade(events);
        events.subscribe_local(DAO_TOPIC, DAO_CRUD, move |event| this.on_dao_crud(&hub, event));

        let this = Arc::clone(self);
        events.subscribe_local(CRUD_TOPIC, EntityKind::Routes.as_str(), move |event| {
            this.on_routes(event)
        });

        let this = Arc::clone(self);
        events.subscribe_local(CRUD_TOPIC, EntityKind::Targets.as_str(), move |event| {
            this.on_targets(event)
        });

        let this = Arc::clone(self);
        let hub = Arc::downgrade(events);
        events.subscribe_local(CRUD_TOPIC, EntityKind::Upstreams.as_str(), move |event| {
            this.on_upstreams(&hub, event)
        });

        let this = Arc::clone(self);
        events.subscribe_local(CRUD_TOPIC, EntityKind::Snis.as_str(), move |event| {
            this.on_snis(event)
        });

        let this = Arc::clone(self);
        events.subscribe_local(BALANCER_TOPIC, INVALIDATE, move |event| match event {
            Event::UpstreamInvalidate(upstream) => this.balancer.invalidate_upstream(upstream),
            other => drop_malformed(
                &channel(BALANCER_TOPIC, INVALIDATE),
                MalformedEvent::UnexpectedPayload(describe(other)),
            ),
        });

        let this = Arc::clone(self);
        events.subscribe_cluster(CLUSTER_BALANCER_INVALIDATE, move |payload| {
            match UpstreamRef::decode(payload) {
                Ok(upstream) => this.balancer.invalidate_upstream(&upstream),
                Err(e) => drop_malformed(CLUSTER_BALANCER_INVALIDATE, e),
            }
        });

        let this = Arc::clone(self);
        events.subscribe_local(CACHE_TOPIC, INVALIDATE, move |event| match event {
            Event::CacheInvalidate(key) => {
                this.cache.invalidate_local(key);
            }
            other => drop_malformed(
                &channel(CACHE_TOPIC, INVALIDATE),
                MalformedEvent::UnexpectedPayload(describe(other)),
            ),
        });

        let this = Arc::clone(self);
        events.subscribe_cluster(CLUSTER_CACHE_INVALIDATE, move |key| {
            if key.is_empty() {
                drop_malformed(CLUSTER_CACHE_INVALIDATE, MalformedEvent::MissingField("key"));
                return;
            }
            this.cache.invalidate_local(key);
        });

        tracing::debug!(
            node = events.publisher().node_id(),
            worker = events.publisher().worker_id(),
            "Invalidation handlers registered"
        );
    }

    fn on_dao_crud(&self, hub: &Weak<WorkerEvents>, event: &Event) {
        let decoded = match event {
            Event::Raw(value) => InvalidationEvent::decode(value),
            other => Err(MalformedEvent::UnexpectedPayload(describe(other))),
        };
        let decoded = match decoded {
            Ok(decoded) => Arc::new(decoded),
            Err(e) => return drop_malformed(&channel(DAO_TOPIC, DAO_CRUD), e),
        };

        for key in decoded.cache_keys() {
            self.cache.invalidate(&key);
        }

        let Some(events) = hub.upgrade() else {
            return;
        };
        let kind = decoded.kind().as_str();
        let operation = decoded.operation().as_str();
        events.post_local(CRUD_TOPIC, kind, Event::Crud(decoded.clone()));
        events.post_local(CRUD_TOPIC, &format!("{}.{}", kind, operation), Event::Crud(decoded));
    }

    fn on_routes(&self, event: &Event) {
        if let Event::Crud(change) = event {
            tracing::debug!(operation = %change.operation(), "Route changed, router version invalidated");
        }
        self.cache.invalidate_local(keys::ROUTER_VERSION);
    }

    fn on_targets(&self, event: &Event) {
        let Event::Crud(change) = event else { return };
        if let InvalidationEvent::Target { target, previous, .. } = change.as_ref() {
            self.balancer.invalidate_targets(&target.upstream_id);
            if let Some(previous) = previous.as_ref().filter(|p| p.upstream_id != target.upstream_id) {
                self.balancer.invalidate_targets(&previous.upstream_id);
            }
        }
    }

    fn on_upstreams(&self, hub: &Weak<WorkerEvents>, event: &Event) {
        let Event::Crud(change) = event else { return };
        let InvalidationEvent::Upstream { upstream, previous, .. } = change.as_ref() else {
            return;
        };

        let mut identities = vec![UpstreamRef::from(upstream)];
        if let Some(previous) = previous {
            let previous = UpstreamRef::from(previous);
            if previous != identities[0] {
                identities.push(previous);
            }
        }

        let events = hub.upgrade();
        for identity in identities {
            self.balancer.invalidate_upstream(&identity);
            if let Some(events) = &events {
                events.publish_cluster(CLUSTER_BALANCER_INVALIDATE, identity.encode());
                events.publish_local(BALANCER_TOPIC, INVALIDATE, Event::UpstreamInvalidate(identity));
            }
        }
    }

    fn on_snis(&self, event: &Event) {
        let Event::Crud(change) = event else { return };
        let InvalidationEvent::Sni { sni, previous, .. } = change.as_ref() else {
            return;
        };

        let mut names = vec![sni.name.as_str()];
        if let Some(previous) = previous.as_ref().filter(|p| p.name != sni.name) {
            names.push(previous.name.as_str());
        }
        for name in names {
            self.cache.invalidate(&keys::pem_certificate(name));
            self.cache.invalidate(&keys::parsed_certificate(name));
        }
    }
}

fn describe(event: &Event) -> String {
    match event {
        Event::Raw(_) => "raw payload".into(),
        Event::Crud(change) => format!("{} {} event", change.kind(), change.operation()),
        Event::UpstreamInvalidate(_) => "upstream invalidation".into(),
        Event::CacheInvalidate(_) => "cache invalidation".into(),
    }
}

fn drop_malformed(channel: &str, error: MalformedEvent) {
    tracing::warn!(channel, error = %error, "Dropping malformed event");
    metrics::record_event_dropped("malformed");
}
