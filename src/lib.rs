//! Edge Gateway Library

pub mod admin;
pub mod cache;
pub mod config;
pub mod events;
pub mod http;
pub mod invalidation;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod store;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Node, Shutdown};
