//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, method, headers)
//!     → context.rs (normalize host, collect attributes)
//!     → state.rs (version check, rebuild if stale)
//!     → router.rs (route lookup in the active snapshot)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched Route or NoMatch
//!
//! Route Compilation (on version change):
//!     DataStore::list_routes
//!     → Sort by creation order
//!     → Compile matchers, index by host
//!     → Publish as immutable RouterSnapshot
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; a rebuild replaces the whole snapshot
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same route set always matches the same route

pub mod context;
pub mod matcher;
pub mod router;
pub mod state;

pub use context::RequestContext;
pub use router::{CompileOptions, RouteMatch, RouterError, RouterSnapshot};
pub use state::RouterState;
