//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, limits, request ID)
//! - Bound each request, retries included, by `timeouts.request_secs`
//! - Bind server to listener and drain on shutdown
//! - Dispatch requests to a worker for routing and balancing
//! - Forward requests to upstream targets, retrying on failure
//! - Observability (metrics, phase timings, correlation IDs)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::upgrade::OnUpgrade;
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::http::forward::{Forward, MAX_BUFFERED_BODY};
use crate::http::{request, response, upstream, websocket};
use crate::lifecycle::{GatewayError, Node, PhaseTimings, RoutedRequest, Shutdown, Worker};
use crate::load_balancer::AttemptOutcome;
use crate::observability::metrics;
use crate::resilience::with_deadline;
use crate::routing::RequestContext;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    /// Bound on a whole proxied request, retries included. Zero means none.
    pub request_timeout: Duration,
}

/// HTTP server for the gateway's proxy listener.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, node: Arc<Node>) -> Self {
        let state = AppState {
            node,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(request::propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(request::set_request_id_layer())
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections.max(1)))
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_connections = self.config.listener.max_connections,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Routes the request on one worker, then tries upstream addresses until one
/// answers or the balancer gives up.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let mut timings = PhaseTimings::start();
    let (mut parts, body) = request.into_parts();
    let request_id = request::request_id(&parts.headers);
    let method = parts.method.to_string();
    let worker = state.node.next_worker().clone();
    let ctx = request::context_from_parts(&parts, client);

    tracing::debug!(
        request_id = %request_id,
        worker = worker.id(),
        method = %parts.method,
        host = ?ctx.host(),
        path = %ctx.path(),
        "Proxying request"
    );

    let proxied = with_deadline(
        "request",
        state.request_timeout,
        proxy(&worker, &mut parts, body, &ctx, &request_id, &mut timings),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::warn!(request_id = %request_id, error = %e, "Request deadline exceeded");
        Err(GatewayError::UpstreamTimeout)
    });

    let (response, upstream) = match proxied {
        Ok(done) => done,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                tracing::warn!(request_id = %request_id, status = %status, error = %e, "Request failed");
            } else {
                tracing::debug!(request_id = %request_id, status = %status, error = %e, "Request rejected");
            }
            (e.into_response(), "none".to_string())
        }
    };

    metrics::record_request(&method, response.status().as_u16(), &upstream, timings.received());
    timings.record(&request_id);
    response
}

async fn proxy(
    worker: &Worker,
    parts: &mut Parts,
    body: Body,
    ctx: &RequestContext,
    request_id: &str,
    timings: &mut PhaseTimings,
) -> Result<(Response, String), GatewayError> {
    let RoutedRequest { matched, mut attempt, .. } = worker.route(ctx).await?;
    timings.mark_routed();

    let upgrade = websocket::is_upgrade_request(&parts.headers);
    let mut client_upgrade = if upgrade {
        parts.extensions.remove::<OnUpgrade>()
    } else {
        None
    };
    let body = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
        .await
        .map_err(|_| GatewayError::BodyTooLarge)?;

    let target = attempt.target.clone();
    let upstream_label = target.host.clone();
    let forward = Forward {
        parts: &*parts,
        ctx,
        matched: &matched,
        target: &target,
        request_id,
        upgrade,
    };

    let mut previous: Option<AttemptOutcome> = None;
    loop {
        let address = match worker.resolve(&mut attempt, previous).await {
            Ok(address) => address,
            Err(source) if attempt.tries().is_empty() => {
                return Err(GatewayError::Balancer {
                    source,
                    first_attempt: true,
                })
            }
            Err(_) if previous == Some(AttemptOutcome::TimedOut) => return Err(GatewayError::UpstreamTimeout),
            Err(source) => {
                return Err(GatewayError::Balancer {
                    source,
                    first_attempt: false,
                })
            }
        };

        let upstream_request = forward.request(body.clone(), &address)?;
        match upstream::send(&address, upstream_request, attempt.timeouts(), timings).await {
            Ok(mut upstream_response) => {
                tracing::debug!(
                    request_id = %request_id,
                    route = %matched.route.display_name(),
                    upstream = %address,
                    status = %upstream_response.status(),
                    try_count = attempt.try_count(),
                    "Upstream responded"
                );
                if upstream_response.status() == StatusCode::SWITCHING_PROTOCOLS {
                    if let Some(client_side) = client_upgrade.take() {
                        let upstream_side = hyper::upgrade::on(&mut upstream_response);
                        websocket::spawn_tunnel(client_side, upstream_side, request_id.to_string());
                    }
                }
                return Ok((response::from_upstream(upstream_response), upstream_label));
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    upstream = %address,
                    try_count = attempt.try_count(),
                    error = %e,
                    "Upstream attempt failed"
                );
                previous = Some(e.outcome());
            }
        }
    }
}
