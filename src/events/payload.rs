//! Event payloads and their boundary decoding.
//!
//! Raw payloads (JSON from the data-access layer, strings from the cluster)
//! are decoded once, here, into closed sets of variants. Anything that does
//! not decode becomes a `MalformedEvent`.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::store::entities::{Entity, EntityCacheKey, EntityKind, Operation, Route, Sni, Target, Upstream};

/// A payload that could not be decoded. Logged and dropped, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unexpected payload on {0}")]
    UnexpectedPayload(String),
}

/// A message on a worker's local channels.
#[derive(Debug, Clone)]
pub enum Event {
    /// Undecoded JSON, as produced by the data-access layer.
    Raw(Value),
    /// A decoded entity change.
    Crud(Arc<InvalidationEvent>),
    /// Drop the balancer pool of an upstream.
    UpstreamInvalidate(UpstreamRef),
    /// Drop a cache key.
    CacheInvalidate(String),
}

/// Identity of an upstream as carried by invalidation broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRef {
    pub id: Uuid,
    pub name: String,
}

impl UpstreamRef {
    /// Cluster wire format: `"<upstream_id>:<upstream_name>"`.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.id, self.name)
    }

    pub fn decode(payload: &str) -> Result<Self, MalformedEvent> {
        let (id, name) = payload
            .split_once(':')
            .ok_or(MalformedEvent::MissingField("name"))?;
        let id = Uuid::parse_str(id).map_err(|e| MalformedEvent::InvalidField {
            field: "id",
            reason: e.to_string(),
        })?;
        if name.is_empty() {
            return Err(MalformedEvent::MissingField("name"));
        }
        Ok(Self {
            id,
            name: name.to_string(),
        })
    }
}

impl From<&Upstream> for UpstreamRef {
    fn from(upstream: &Upstream) -> Self {
        Self {
            id: upstream.id,
            name: upstream.name.clone(),
        }
    }
}

impl fmt::Display for UpstreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A change to a stored entity, with the version it replaced.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationEvent {
    Route {
        operation: Operation,
        route: Route,
        previous: Option<Route>,
    },
    Upstream {
        operation: Operation,
        upstream: Upstream,
        previous: Option<Upstream>,
    },
    Target {
        operation: Operation,
        target: Target,
        previous: Option<Target>,
    },
    Sni {
        operation: Operation,
        sni: Sni,
        previous: Option<Sni>,
    },
}

impl InvalidationEvent {
    /// Pair an entity with its previous version.
    ///
    /// A previous version of a different kind is ignored.
    pub fn new(operation: Operation, entity: Entity, previous: Option<Entity>) -> Self {
        match entity {
            Entity::Route(route) => InvalidationEvent::Route {
                operation,
                route,
                previous: previous.and_then(|p| match p {
                    Entity::Route(r) => Some(r),
                    _ => None,
                }),
            },
            Entity::Upstream(upstream) => InvalidationEvent::Upstream {
                operation,
                upstream,
                previous: previous.and_then(|p| match p {
                    Entity::Upstream(u) => Some(u),
                    _ => None,
                }),
            },
            Entity::Target(target) => InvalidationEvent::Target {
                operation,
                target,
                previous: previous.and_then(|p| match p {
                    Entity::Target(t) => Some(t),
                    _ => None,
                }),
            },
            Entity::Sni(sni) => InvalidationEvent::Sni {
                operation,
                sni,
                previous: previous.and_then(|p| match p {
                    Entity::Sni(s) => Some(s),
                    _ => None,
                }),
            },
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            InvalidationEvent::Route { .. } => EntityKind::Routes,
            InvalidationEvent::Upstream { .. } => EntityKind::Upstreams,
            InvalidationEvent::Target { .. } => EntityKind::Targets,
            InvalidationEvent::Sni { .. } => EntityKind::Snis,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            InvalidationEvent::Route { operation, .. }
            | InvalidationEvent::Upstream { operation, .. }
            | InvalidationEvent::Target { operation, .. }
            | InvalidationEvent::Sni { operation, .. } => *operation,
        }
    }

    /// Cache keys of the entity and of its previous version, deduplicated.
    pub fn cache_keys(&self) -> Vec<String> {
        let (current, previous) = match self {
            InvalidationEvent::Route { route, previous, .. } => {
                (route.cache_key(), previous.as_ref().and_then(|p| p.cache_key()))
            }
            InvalidationEvent::Upstream { upstream, previous, .. } => {
                (upstream.cache_key(), previous.as_ref().and_then(|p| p.cache_key()))
            }
            InvalidationEvent::Target { target, previous, .. } => {
                (target.cache_key(), previous.as_ref().and_then(|p| p.cache_key()))
            }
            InvalidationEvent::Sni { sni, previous, .. } => {
                (sni.cache_key(), previous.as_ref().and_then(|p| p.cache_key()))
            }
        };

        let mut keys: Vec<String> = current.into_iter().chain(previous).collect();
        keys.dedup();
        keys
    }

    /// Raw form posted by the data-access layer.
    pub fn encode(&self) -> Value {
        let (entity, previous) = match self {
            InvalidationEvent::Route { route, previous, .. } => (
                Entity::Route(route.clone()),
                previous.clone().map(Entity::Route),
            ),
            InvalidationEvent::Upstream { upstream, previous, .. } => (
                Entity::Upstream(upstream.clone()),
                previous.clone().map(Entity::Upstream),
            ),
            InvalidationEvent::Target { target, previous, .. } => (
                Entity::Target(target.clone()),
                previous.clone().map(Entity::Target),
            ),
            InvalidationEvent::Sni { sni, previous, .. } => {
                (Entity::Sni(sni.clone()), previous.clone().map(Entity::Sni))
            }
        };

        json!({
            "entity_kind": self.kind().as_str(),
            "operation": self.operation().as_str(),
            "entity": entity.to_json(),
            "previous_entity": previous.map(|p| p.to_json()),
        })
    }

    /// Decode and validate a raw payload.
    pub fn decode(value: &Value) -> Result<Self, MalformedEvent> {
        let kind: EntityKind = value
            .get("entity_kind")
            .and_then(Value::as_str)
            .ok_or(MalformedEvent::MissingField("entity_kind"))?
            .parse()
            .map_err(|reason| MalformedEvent::InvalidField {
                field: "entity_kind",
                reason,
            })?;

        let operation: Operation = serde_json::from_value(
            value
                .get("operation")
                .cloned()
                .ok_or(MalformedEvent::MissingField("operation"))?,
        )
        .map_err(|e| MalformedEvent::InvalidField {
            field: "operation",
            reason: e.to_string(),
        })?;

        let entity = match value.get("entity") {
            Some(v) if !v.is_null() => {
                Entity::from_json(kind, v.clone()).map_err(|e| MalformedEvent::InvalidField {
                    field: "entity",
                    reason: e.to_string(),
                })?
            }
            _ => return Err(MalformedEvent::MissingField("entity")),
        };

        let previous = match value.get("previous_entity") {
            Some(v) if !v.is_null() => Some(Entity::from_json(kind, v.clone()).map_err(|e| {
                MalformedEvent::InvalidField {
                    field: "previous_entity",
                    reason: e.to_string(),
                }
            })?),
            _ => None,
        };

        Ok(Self::new(operation, entity, previous))
    }
}
