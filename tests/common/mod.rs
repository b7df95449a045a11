//! Shared helpers for integration tests.

#![allow(dead_code)]

use chat_relay::protocol::{ChatMessage, FrameCodec, MessageKind};
use chat_relay::{ClientRegistry, Config, Lifecycle, Server};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub lifecycle: Lifecycle,
    pub registry: Arc<ClientRegistry>,
    pub task: JoinHandle<()>,
}

pub fn test_config(max_clients: usize) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_clients,
        stats_interval: None,
        handshake_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(2),
        ..Config::default()
    }
}

impl TestServer {
    pub async fn start(max_clients: usize) -> Self {
        Self::with_config(test_config(max_clients)).await
    }

    pub async fn with_config(config: Config) -> Self {
        let lifecycle = Lifecycle::new();
        let server = Server::new(config, lifecycle.clone());
        let registry = server.registry();
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(server.serve(listener));

        Self {
            addr,
            lifecycle,
            registry,
            task,
        }
    }

    /// Wait until `check` holds for the registry.
    pub async fn until(&self, check: impl Fn(&ClientRegistry) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !check(self.registry.as_ref()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry condition not reached");
    }

    pub async fn stop(self) {
        self.lifecycle.request_stop();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

/// A raw protocol peer.
pub struct Peer {
    pub framed: Framed<TcpStream, FrameCodec>,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, FrameCodec),
        }
    }

    /// Connect and complete the handshake, consuming the welcome.
    pub async fn join(addr: SocketAddr, username: &str) -> Self {
        let mut peer = Self::connect(addr).await;
        peer.send(&ChatMessage::connect(username)).await;
        let welcome = peer.recv().await;
        assert_eq!(welcome.kind(), MessageKind::Notification);
        assert_eq!(welcome.body(), "Connected to chat. Welcome!");
        peer
    }

    pub async fn send(&mut self, msg: &ChatMessage) {
        self.framed.send(msg).await.unwrap();
    }

    pub async fn recv(&mut self) -> ChatMessage {
        tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap()
            .unwrap()
    }

    /// Read until the server closes the connection, returning what arrived.
    pub async fn until_closed(&mut self) -> Vec<ChatMessage> {
        let mut seen = Vec::new();
        loop {
            let next = tokio::time::timeout(WAIT, self.framed.next())
                .await
                .expect("connection was not closed");
            match next {
                Some(Ok(Ok(msg))) => seen.push(msg),
                Some(Ok(Err(e))) => panic!("malformed frame from server: {e}"),
                Some(Err(_)) | None => return seen,
            }
        }
    }

    /// Assert nothing arrives for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(next) = tokio::time::timeout(window, self.framed.next()).await {
            panic!("expected silence, got {next:?}");
        }
    }
}
