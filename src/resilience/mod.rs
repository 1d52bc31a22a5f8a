//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against an upstream address:
//!     → timeouts.rs (connect, then send + read under the route's deadlines)
//!     → On failure or timeout: the balancer picks another address
//!
//! Whole request:
//!     → with_deadline("request", timeouts.request_secs) around every attempt
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream attempt has a deadline
//! - A timeout counts as a failed attempt, never as a response
//! - Retrying is the balancer's job; this module only classifies outcomes

pub mod timeouts;

pub use timeouts::{with_deadline, DeadlineExceeded};
