/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Shared helpers for relay integration tests.

#![allow(dead_code)]

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use ws_relay::config::{RelayConfig, RouteConfig};
use ws_relay::server;
use ws_relay::upstream::UpstreamTarget;

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const REDIRECT_URL: &str = "https://info.example";

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// A TCP listener standing in for the validator node.
pub struct FakeUpstream {
    listener: TcpListener,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("local addr").port()
    }

    pub fn route(&self, path: &str) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            upstream: UpstreamTarget::new("127.0.0.1", self.port()),
        }
    }

    /// Wait for the relay to open its upstream connection.
    pub async fn accept(&self) -> TcpStream {
        let (stream, _) = tokio::time::timeout(TIMEOUT, self.listener.accept())
            .await
            .expect("relay did not connect upstream")
            .expect("accept upstream connection");
        stream
    }
}

/// A port nothing is listening on.
pub async fn dead_route(path: &str) -> RouteConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    RouteConfig {
        path: path.to_string(),
        upstream: UpstreamTarget::new("127.0.0.1", port),
    }
}

pub fn test_config(routes: Vec<RouteConfig>) -> RelayConfig {
    RelayConfig {
        listen: vec!["127.0.0.1:0".parse().unwrap()],
        routes,
        redirect_url: REDIRECT_URL.to_string(),
        connect_timeout_ms: 2_000,
        workers: Some(1),
        ..RelayConfig::default()
    }
}

/// Start a relay server on an ephemeral port and return its address.
pub fn start_relay(config: RelayConfig) -> SocketAddr {
    config.validate().expect("valid test config");
    let relay = server::build(&config).expect("bind relay");
    let addr = relay.addrs[0];
    actix_rt::spawn(relay.server);
    addr
}

pub async fn connect_ws(addr: SocketAddr, path: &str) -> WsClient {
    let url = format!("ws://{addr}{path}");
    let (ws, _) = tokio::time::timeout(TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .expect("websocket handshake timed out")
        .expect("websocket handshake failed");
    ws
}

/// Read binary messages until `len` bytes have arrived; returns the
/// concatenated payload and the number of messages it came in.
pub async fn read_binary(ws: &mut WsClient, len: usize) -> (Vec<u8>, usize) {
    let mut received = Vec::with_capacity(len);
    let mut messages = 0;
    while received.len() < len {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for relayed bytes")
            .expect("websocket ended early")
            .expect("websocket error");
        match msg {
            Message::Binary(data) => {
                received.extend_from_slice(&data);
                messages += 1;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message {other:?}"),
        }
    }
    (received, messages)
}

/// Wait until the relay closes the WebSocket. Returns the close frame if one
/// was received before the connection ended.
pub async fn expect_ws_closed(ws: &mut WsClient) -> Option<CloseFrame<'static>> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("relay did not close the websocket")
}

/// Wait until the relay closes the upstream connection, returning whatever
/// was still written before the close.
pub async fn expect_upstream_closed(upstream: &mut TcpStream) -> Vec<u8> {
    use tokio::io::AsyncReadExt;

    let mut rest = Vec::new();
    let _ = tokio::time::timeout(TIMEOUT, upstream.read_to_end(&mut rest))
        .await
        .expect("relay did not close the upstream connection");
    rest
}

/// Send a raw HTTP/1.1 request and return the full response text.
pub async fn raw_http(addr: SocketAddr, request: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(addr).await.expect("connect relay");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("http response timed out")
        .expect("read http response");
    String::from_utf8_lossy(&response).into_owned()
}
