//! Per-request lifecycle state.
//!
//! # Responsibilities
//! - Carry the routing decision and balancer bookkeeping of one request
//! - Map every failure of the request path to a client-facing status
//! - Time the phases of a request
//!
//! # Design Decisions
//! - Error messages shown to clients never include internal details
//! - A balancer failure before any upstream was tried is a gateway fault (500);
//!   after one was tried it is an upstream fault (502)

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use thiserror::Error;

use crate::load_balancer::{AttemptState, BalancerError};
use crate::observability::metrics;
use crate::routing::{RouteMatch, RouterSnapshot};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matched")]
    NoRoute,

    #[error("router unavailable")]
    NoRouter,

    #[error("route requires https")]
    HttpsRequired,

    #[error("route '{route}' has an unusable upstream url")]
    InvalidUpstream { route: String },

    #[error("balancer failed: {source}")]
    Balancer {
        #[source]
        source: BalancerError,
        first_attempt: bool,
    },

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("request body too large")]
    BodyTooLarge,

    #[error("could not build upstream request: {0}")]
    BadUpstreamRequest(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute => StatusCode::NOT_FOUND,
            GatewayError::HttpsRequired => StatusCode::UPGRADE_REQUIRED,
            GatewayError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Balancer { first_attempt: false, .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Balancer { first_attempt: true, .. }
            | GatewayError::NoRouter
            | GatewayError::InvalidUpstream { .. }
            | GatewayError::BadUpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to send to the client.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::NoRoute => "no Route matched with those values",
            GatewayError::HttpsRequired => "Please use HTTPS protocol",
            GatewayError::BodyTooLarge => "Request body too large",
            GatewayError::UpstreamTimeout => "The upstream server is timing out",
            GatewayError::Balancer { first_attempt: false, .. } => {
                "An invalid response was received from the upstream server"
            }
            _ => "An unexpected error occurred",
        }
    }
}

/// Outcome of routing: the matched route, the snapshot it came from, and the
/// balancer state for its attempts.
#[derive(Debug)]
pub struct RoutedRequest {
    pub matched: RouteMatch,
    pub snapshot: Arc<RouterSnapshot>,
    pub attempt: AttemptState,
}

/// Wall-clock marks of a request's phases.
#[derive(Debug, Clone)]
pub struct PhaseTimings {
    received: Instant,
    routed: Option<Instant>,
    connected: Option<Instant>,
    headers_sent: Option<Instant>,
    body_sent: Option<Instant>,
}

impl PhaseTimings {
    pub fn start() -> Self {
        Self {
            received: Instant::now(),
            routed: None,
            connected: None,
            headers_sent: None,
            body_sent: None,
        }
    }

    pub fn received(&self) -> Instant {
        self.received
    }

    pub fn mark_routed(&mut self) {
        self.routed = Some(Instant::now());
    }

    /// Connection to the upstream is up. Later attempts overwrite earlier ones.
    pub fn mark_connected(&mut self) {
        self.connected = Some(Instant::now());
    }

    pub fn mark_headers_sent(&mut self) {
        self.headers_sent = Some(Instant::now());
    }

    pub fn mark_body_sent(&mut self) {
        self.body_sent = Some(Instant::now());
    }

    /// Elapsed time from receipt to each reached phase.
    pub fn phases(&self) -> Vec<(&'static str, Duration)> {
        [
            ("routed", self.routed),
            ("connected", self.connected),
            ("headers_sent", self.headers_sent),
            ("body_sent", self.body_sent),
        ]
        .into_iter()
        .filter_map(|(name, at)| at.map(|at| (name, at.saturating_duration_since(self.received))))
        .collect()
    }

    /// Emit the phases as histograms and one debug line.
    pub fn record(&self, request_id: &str) {
        let phases = self.phases();
        for (phase, elapsed) in &phases {
            metrics::record_phase(*phase, *elapsed);
        }
        tracing::debug!(
            request_id = %request_id,
            phases = ?phases,
            total = ?self.received.elapsed(),
            "Request phases"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::BalancerError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::NoRoute.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::NoRouter.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(GatewayError::HttpsRequired.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(GatewayError::UpstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let first = GatewayError::Balancer {
            source: BalancerError::NoHealthyUpstream { upstream: "svc".into() },
            first_attempt: true,
        };
        assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let later = GatewayError::Balancer {
            source: BalancerError::RetriesExhausted { attempts: 3 },
            first_attempt: false,
        };
        assert_eq!(later.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = GatewayError::Balancer {
            source: BalancerError::ResolutionFailed {
                host: "db.internal".into(),
                reason: "nxdomain".into(),
            },
            first_attempt: false,
        };
        assert!(!err.public_message().contains("db.internal"));

        let err = GatewayError::BadUpstreamRequest("invalid uri character at 10.0.0.7".into());
        assert!(!err.public_message().contains("10.0.0.7"));
    }

    #[test]
    fn test_phases_only_include_reached_marks() {
        let mut timings = PhaseTimings::start();
        timings.mark_routed();
        timings.mark_connected();

        let names: Vec<_> = timings.phases().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["routed", "connected"]);
    }
}
