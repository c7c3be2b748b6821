//! Relay WebSocket server.
//!
//! Listens on a TCP port, upgrades every incoming connection to
//! WebSocket and hands each socket its own [`MemberId`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use handoff_protocol::constants::{DEFAULT_RELAY_PORT, WS_MAX_MESSAGE_SIZE};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection::{self, ClientConnection};
use crate::handler::Handler;
use crate::registry::MemberId;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_RELAY_PORT,
        }
    }
}

/// The relay WebSocket server.
///
/// Accepts any number of concurrent clients and dispatches their
/// messages to the provided [`Handler`].
pub struct RelayServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: Mutex<HashMap<MemberId, ClientConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> RelayServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            connections: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the handler shared by every connection.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of live client sockets.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("relay shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn close_all(&self) {
        let conns: Vec<ClientConnection> =
            self.connections.lock().await.drain().map(|(_, c)| c).collect();
        for conn in &conns {
            conn.close_and_wait().await;
        }
    }

    /// Upgrades one TCP stream and registers its connection.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let member = MemberId::new();
        tracing::info!(%peer_addr, %member, "client connected");

        let conn = connection::spawn_connection(
            ws_stream,
            member,
            peer_addr.to_string(),
            Arc::clone(&self.handler),
            self.cancel.clone(),
        );
        let mut done = conn.done();
        self.connections.lock().await.insert(member, conn);

        // Forget the connection once its disconnect hook has run.
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let _ = done.wait_for(|finished| *finished).await;
            server.connections.lock().await.remove(&member);
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerFuture;
    use crate::connection::Sender;
    use handoff_protocol::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts create requests and disconnects.
    #[derive(Default)]
    struct CountingHandler {
        creates: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl Handler for CountingHandler {
        fn on_create(&self, _: MemberId, _: Sender, _: Message) -> HandlerFuture<'_> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }

        fn on_join(&self, _: MemberId, _: Sender, _: Message) -> HandlerFuture<'_> {
            Box::pin(async {})
        }

        fn on_relay(&self, _: MemberId, _: Sender, _: Message) -> HandlerFuture<'_> {
            Box::pin(async {})
        }

        fn on_disconnected(&self, _: MemberId) -> HandlerFuture<'_> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
        }
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let server = RelayServer::new(test_config(), CountingHandler::default());
        let server2 = Arc::clone(&server);

        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(server.port().await > 0, "should have bound to a dynamic port");
        assert_eq!(server.connection_count().await, 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_accepts_many_connections() {
        let server = RelayServer::new(test_config(), CountingHandler::default());
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);

        let (ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (_ws3, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(server.connection_count().await, 3);

        drop(ws1);
        drop(ws2);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 2);
        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_dispatches_text_message() {
        use futures_util::SinkExt;

        let server = RelayServer::new(test_config(), CountingHandler::default());
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let msg = serde_json::json!({ "event": "create", "code": "BLUE-FOX-42" });
        ws.send(tokio_tungstenite::tungstenite::Message::Text(
            msg.to_string().into(),
        ))
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(server.handler().creates.load(Ordering::SeqCst), 1);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_runs_disconnect_hooks() {
        let server = RelayServer::new(test_config(), CountingHandler::default());
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);
        let (_ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        server.shutdown();
        handle.await.unwrap();
        assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);
    }
}
