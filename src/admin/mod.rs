pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, put},
    Router,
};

use crate::lifecycle::Node;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub node: Arc<Node>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(list_routes).post(create_route))
        .route("/admin/routes/{id}", delete(delete_route))
        .route("/admin/upstreams", get(list_upstreams).post(create_upstream))
        .route("/admin/upstreams/{id}", delete(delete_upstream))
        .route("/admin/upstreams/{id}/targets", get(list_targets).post(add_target))
        .route("/admin/snis", put(put_sni))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
