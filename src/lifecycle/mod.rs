//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Node (node.rs):
//!     Start workers → start event pumps → serve requests round-robin
//!
//! Request (worker.rs, request.rs):
//!     version token → fresh router → match → https check
//!         → balancer attempts → phase timings
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → trigger → listeners drain, pumps stop
//! ```
//!
//! # Design Decisions
//! - Workers share nothing but the store and the buses
//! - Routing errors carry their HTTP status; handlers never pick codes

pub mod node;
pub mod request;
pub mod shutdown;
pub mod signals;
pub mod worker;

pub use node::Node;
pub use request::{GatewayError, PhaseTimings, RoutedRequest};
pub use shutdown::Shutdown;
pub use worker::Worker;
