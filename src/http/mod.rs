//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, routing context)
//!     → worker routes the request, balancer picks an address
//!     → forward.rs (rewrite path and headers)
//!     → upstream.rs (connect/send/read under the route's timeouts)
//!     → response.rs (strip hop-by-hop, map errors)
//!     → websocket.rs (tunnel after 101)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
