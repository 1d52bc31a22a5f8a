//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use edge_gateway::config::{parse_config, GatewayConfig};
use edge_gateway::events::{ClusterTransport, InMemoryCluster};
use edge_gateway::lifecycle::{Node, Shutdown};
use edge_gateway::store::{declarative, DataStore, MemoryStore};
use edge_gateway::HttpServer;

/// A gateway node serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub node: Arc<Node>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
        self.node.shutdown();
    }
}

/// Parse a TOML config, forcing the listener onto an ephemeral port.
pub fn config(toml: &str) -> GatewayConfig {
    let mut config = parse_config(toml).expect("test config must be valid");
    config.listener.bind_address = "127.0.0.1:0".into();
    config
}

/// Start a single node with its own store and sync `config` into it.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
    let cluster: Arc<dyn ClusterTransport> = Arc::new(InMemoryCluster::default());
    let gateway = start_node(config.clone(), store, cluster).await;
    declarative::sync(gateway.node.workers()[0].dao(), None, &config)
        .await
        .expect("declarative sync");
    gateway
}

/// Start a node on a shared store and cluster without syncing anything.
pub async fn start_node(
    config: GatewayConfig,
    store: Arc<dyn DataStore>,
    cluster: Arc<dyn ClusterTransport>,
) -> TestGateway {
    let node = Node::start(&config, store, cluster);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(config, node.clone());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestGateway { addr, node, shutdown }
}

/// Start a backend answering every request with `200` and a body of
/// `"<name> <path> host=<host header>"`.
pub async fn start_mock_backend(name: &'static str) -> SocketAddr {
    start_status_backend(name, 200).await
}

/// Like [`start_mock_backend`], answering with `status`.
pub async fn start_status_backend(name: &'static str, status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(serve_one(socket, name, status));
                }
                Err(_) => break,
            }
        }
    });
    addr
}

async fn serve_one(mut socket: TcpStream, name: &'static str, status: u16) {
    let head = match read_head(&mut socket).await {
        Some(head) => head,
        None => return,
    };
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("")
        .to_string();
    let host = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case("host").then(|| value.trim().to_string())
        })
        .unwrap_or_default();

    let body = format!("{} {} host={}", name, path, host);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Read until the end of the request head.
pub async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A client that never reuses connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
