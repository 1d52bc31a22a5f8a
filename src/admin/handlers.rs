use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::admin::AdminState;
use crate::http::response::json_message;
use crate::store::entities::DEFAULT_TARGET_WEIGHT;
use crate::store::{Entity, EntityKind, Route, Sni, StoreError, Target, Upstream};

#[derive(Debug)]
pub struct AdminError(StoreError);

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Invalid { .. } => StatusCode::BAD_REQUEST,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        }
        json_message(status, &self.0.to_string())
    }
}

type AdminResult<T> = Result<T, AdminError>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub node_id: String,
    pub workers: usize,
    pub routes: usize,
    pub upstreams: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> AdminResult<Json<SystemStatus>> {
    let store = state.node.next_worker().dao().store().clone();
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        node_id: state.node.id().to_string(),
        workers: state.node.workers().len(),
        routes: store.list_routes().await?.len(),
        upstreams: store.list_upstreams().await?.len(),
    }))
}

pub async fn list_routes(State(state): State<AdminState>) -> AdminResult<Json<Vec<Route>>> {
    let routes = state.node.next_worker().dao().store().list_routes().await?;
    Ok(Json(routes))
}

pub async fn create_route(
    State(state): State<AdminState>,
    Json(route): Json<Route>,
) -> AdminResult<(StatusCode, Json<Value>)> {
    let saved = state.node.next_worker().dao().save(Entity::Route(route)).await?;
    Ok((StatusCode::CREATED, Json(saved.to_json())))
}

pub async fn delete_route(State(state): State<AdminState>, Path(id): Path<Uuid>) -> AdminResult<StatusCode> {
    state.node.next_worker().dao().delete(EntityKind::Routes, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_upstreams(State(state): State<AdminState>) -> AdminResult<Json<Vec<Upstream>>> {
    let upstreams = state.node.next_worker().dao().store().list_upstreams().await?;
    Ok(Json(upstreams))
}

pub async fn create_upstream(
    State(state): State<AdminState>,
    Json(upstream): Json<Upstream>,
) -> AdminResult<(StatusCode, Json<Value>)> {
    let saved = state.node.next_worker().dao().save(Entity::Upstream(upstream)).await?;
    Ok((StatusCode::CREATED, Json(saved.to_json())))
}

pub async fn delete_upstream(State(state): State<AdminState>, Path(id): Path<Uuid>) -> AdminResult<StatusCode> {
    state.node.next_worker().dao().delete(EntityKind::Upstreams, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_targets(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> AdminResult<Json<Vec<Target>>> {
    let targets = state.node.next_worker().dao().store().list_targets(&id).await?;
    Ok(Json(targets))
}

#[derive(Debug, Deserialize)]
pub struct NewTarget {
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    DEFAULT_TARGET_WEIGHT
}

/// Append a target record. Weight 0 takes `host:port` out of rotation.
pub async fn add_target(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(new): Json<NewTarget>,
) -> AdminResult<(StatusCode, Json<Value>)> {
    let target = Target::new(id, new.target, new.weight);
    let saved = state.node.next_worker().dao().save(Entity::Target(target)).await?;
    Ok((StatusCode::CREATED, Json(saved.to_json())))
}

pub async fn put_sni(State(state): State<AdminState>, Json(sni): Json<Sni>) -> AdminResult<Json<Value>> {
    let saved = state.node.next_worker().dao().save(Entity::Sni(sni)).await?;
    Ok(Json(saved.to_json()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::setup_admin_router;
    use crate::config::GatewayConfig;
    use crate::events::InMemoryCluster;
    use crate::lifecycle::Node;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AdminState {
        let mut config = GatewayConfig::default();
        config.node.workers = 2;
        AdminState {
            node: Node::start(
                &config,
                Arc::new(MemoryStore::new()),
                Arc::new(InMemoryCluster::default()),
            ),
            api_key: Arc::from("secret"),
        }
    }

    fn request(method: &str, uri: &str, body: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_key() {
        let app = setup_admin_router(state());
        let response = app
            .clone()
            .oneshot(request("GET", "/admin/status", "", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/admin/status", "", Some("nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_route_create_and_delete() {
        let state = state();
        let app = setup_admin_router(state.clone());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/admin/routes",
                r#"{"hosts": ["api.test"], "upstream_url": "http://10.0.0.1:9000"}"#,
                Some("secret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let routes = state.node.workers()[0].dao().store().list_routes().await.unwrap();
        assert_eq!(routes.len(), 1);

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/admin/routes/{}", routes[0].id), "", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("DELETE", &format!("/admin/routes/{}", routes[0].id), "", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_target_for_unknown_upstream_is_bad_request() {
        let app = setup_admin_router(state());
        let response = app
            .oneshot(request(
                "POST",
                &format!("/admin/upstreams/{}/targets", Uuid::new_v4()),
                r#"{"target": "10.0.0.1:80"}"#,
                Some("secret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
