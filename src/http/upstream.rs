//! One attempt against an upstream address.
//!
//! # Data Flow
//! ```text
//! connect (connect timeout)
//!     → HTTP/1.1 handshake
//!     → write request (send timeout, until the body is flushed)
//!     → wait for response head (read timeout)
//! ```
//!
//! # Design Decisions
//! - A fresh connection per attempt; each attempt may target a different address
//! - Connections keep upgrade support so WebSocket tunnels can take them over

use std::convert::Infallible;
use std::io;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use futures_util::{stream, StreamExt};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::lifecycle::PhaseTimings;
use crate::load_balancer::{AttemptOutcome, ResolvedAddress};
use crate::resilience::{with_deadline, DeadlineExceeded};
use crate::store::entities::Timeouts;

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    TimedOut(#[from] DeadlineExceeded),

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("upstream protocol error: {0}")]
    Protocol(#[from] hyper::Error),
}

impl AttemptError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            AttemptError::TimedOut(_) => AttemptOutcome::TimedOut,
            _ => AttemptOutcome::Failed,
        }
    }
}

/// Body that reports, through `done`, when the transport asked for more after
/// the last chunk.
fn tracked_body(bytes: Bytes, done: oneshot::Sender<()>) -> Body {
    if bytes.is_empty() {
        let _ = done.send(());
        return Body::empty();
    }
    let data = stream::once(async move { Ok::<_, Infallible>(bytes) });
    let end = stream::once(async move {
        let _ = done.send(());
    })
    .filter_map(|()| async { None::<Result<Bytes, Infallible>> });
    Body::from_stream(data.chain(end))
}

/// Send `request` to `address` and wait for the response head.
pub async fn send(
    address: &ResolvedAddress,
    request: Request<Bytes>,
    timeouts: &Timeouts,
    timings: &mut PhaseTimings,
) -> Result<Response<Incoming>, AttemptError> {
    let stream = with_deadline(
        "connect",
        timeouts.connect,
        TcpStream::connect((address.host.as_str(), address.port)),
    )
    .await?
    .map_err(AttemptError::Connect)?;
    let _ = stream.set_nodelay(true);
    timings.mark_connected();

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    let peer = address.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            tracing::debug!(upstream = %peer, error = %e, "Upstream connection closed with error");
        }
    });

    let (parts, bytes) = request.into_parts();
    let (done_tx, mut done_rx) = oneshot::channel();
    let request = Request::from_parts(parts, tracked_body(bytes, done_tx));

    timings.mark_headers_sent();
    let response = sender.send_request(request);
    tokio::pin!(response);

    let early = with_deadline("send", timeouts.send, async {
        tokio::select! {
            _ = &mut done_rx => None,
            result = &mut response => Some(result),
        }
    })
    .await?;
    timings.mark_body_sent();

    match early {
        Some(result) => Ok(result?),
        None => Ok(with_deadline("read", timeouts.read, response).await??),
    }
}
