//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound each phase of an upstream attempt by the route's timeouts
//! - Bound a whole request, retries included
//! - Turn an elapsed deadline into a distinct error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out attempts map to 504 Gateway Timeout once retries run out

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A phase of an attempt did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{phase} timed out after {after:?}")]
pub struct DeadlineExceeded {
    pub phase: &'static str,
    pub after: Duration,
}

/// Run `fut` for at most `limit`. A zero limit means no limit.
pub async fn with_deadline<F>(phase: &'static str, limit: Duration, fut: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    if limit.is_zero() {
        return Ok(fut.await);
    }
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeadlineExceeded { phase, after: limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_elapses() {
        let err = with_deadline("connect", Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.phase, "connect");
        assert_eq!(err.to_string(), "connect timed out after 10ms");
    }

    #[tokio::test]
    async fn test_with_deadline_passes_output_through() {
        let value = with_deadline("read", Duration::from_secs(1), async { 7 }).await.unwrap();
        assert_eq!(value, 7);

        let unbounded = with_deadline("read", Duration::ZERO, async { 8 }).await.unwrap();
        assert_eq!(unbounded, 8);
    }
}
