//! WebSocket connections tunnelled through the gateway.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

mod common;

/// Start a WebSocket server that echoes every text frame.
async fn start_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() && ws.send(msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_websocket_echo_through_gateway() {
    let backend = start_echo_server().await;
    let config = common::config(&format!(
        r#"
        [[routes]]
        name = "ws"
        paths = ["/ws"]
        upstream_url = "http://{backend}"
        "#
    ));
    let gateway = common::start_gateway(config).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{}/ws", gateway.addr))
        .await
        .expect("handshake through gateway");
    assert_eq!(response.status(), 101);

    for text in ["hello", "world"] {
        ws.send(Message::text(text)).await.unwrap();
        let echoed = ws.next().await.unwrap().unwrap();
        assert_eq!(echoed.into_text().unwrap().as_str(), text);
    }
    ws.close(None).await.unwrap();

    gateway.stop();
}

#[tokio::test]
async fn test_websocket_to_unrouted_path_is_rejected() {
    let backend = start_echo_server().await;
    let config = common::config(&format!(
        r#"
        [[routes]]
        name = "ws"
        paths = ["/ws"]
        upstream_url = "http://{backend}"
        "#
    ));
    let gateway = common::start_gateway(config).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/other", gateway.addr)).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404)
        }
        other => panic!("expected HTTP 404, got {:?}", other.map(|(_, r)| r.status())),
    }

    gateway.stop();
}
