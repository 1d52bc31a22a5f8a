//! Edge Gateway (v1)
//!
//! An API gateway core built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────── NODE ─────────────────────────────┐
//!                        │                                                                │
//!   Client Request       │  ┌─────────┐   ┌──────────────────── worker N ─────────────┐  │
//!   ─────────────────────┼─▶│  http   │──▶│ router snapshot ──▶ balancer ──▶ attempt  │──┼──▶ Upstream
//!                        │  │ server  │   │        ▲                ▲                 │  │
//!                        │  └─────────┘   │        │   cache        │                 │  │
//!                        │                │        └──── invalidation coordinator ◀──┐│  │
//!                        │                └──────────────────────────────────────────┼┘  │
//!                        │                                                            │   │
//!   Admin / config ──────┼──▶ Dao ──▶ store ──▶ dao.crud ──▶ node bus ─┬──────────────┘   │
//!                        │                                              └──▶ cluster ──────┼──▶ other nodes
//!                        └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use notify::RecommendedWatcher;
use tokio::net::TcpListener;

use edge_gateway::admin::{setup_admin_router, AdminState};
use edge_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use edge_gateway::events::{ClusterTransport, InMemoryCluster};
use edge_gateway::lifecycle::{signals, Node, Shutdown};
use edge_gateway::observability::{logging, metrics};
use edge_gateway::store::{declarative, DataStore, MemoryStore};
use edge_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "API gateway with live routing and balancing", long_about = None)]
struct Args {
    /// TOML configuration file. Watched for changes when given.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("edge-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers = config.node.workers,
        routes = config.routes.len(),
        upstreams = config.upstreams.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
    let cluster: Arc<dyn ClusterTransport> = Arc::new(InMemoryCluster::default());
    let node = Node::start(&config, store, cluster);
    declarative::sync(node.next_worker().dao(), None, &config).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let _watcher = match &args.config {
        Some(path) => Some(spawn_config_reload(path, node.clone(), config.clone(), shutdown.clone())?),
        None => None,
    };

    if config.admin.enabled {
        if config.admin.api_key == GatewayConfig::default().admin.api_key {
            tracing::warn!("Admin API is using the default API key");
        }
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Admin API listening");

        let router = setup_admin_router(AdminState {
            node: node.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let stop = shutdown.wait();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(stop).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Listening for connections");

    HttpServer::new(config, node.clone()).run(listener, shutdown).await?;
    node.shutdown();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Sync declarative entities on every valid edit of the config file.
///
/// Only `routes` and `upstreams` are applied live; other sections take
/// effect on restart.
fn spawn_config_reload(
    path: &Path,
    node: Arc<Node>,
    mut current: GatewayConfig,
    shutdown: Shutdown,
) -> Result<RecommendedWatcher, notify::Error> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;

    tokio::spawn(async move {
        let stop = shutdown.wait();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                next = updates.recv() => {
                    let Some(next) = next else { break };
                    if next == current {
                        continue;
                    }
                    match declarative::sync(node.next_worker().dao(), Some(&current), &next).await {
                        Ok(report) => {
                            tracing::info!(
                                created = report.created,
                                updated = report.updated,
                                deleted = report.deleted,
                                "Configuration reloaded"
                            );
                            current = next;
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to apply reloaded configuration"),
                    }
                }
                _ = &mut stop => break,
            }
        }
    });

    Ok(handle)
}
