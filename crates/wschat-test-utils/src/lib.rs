//! Common test helpers and utilities for wschat tests
//!
//! This crate provides:
//! - Port allocation
//! - Condition-based waiting (no hardcoded sleeps)
//! - A test router with RAII cleanup
//! - A chat client built on the WebSocket transport

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use wschat_core::Message;
use wschat_router::{Router, RouterConfig};
use wschat_transport::{
    Transport, TransportError, TransportEvent, TransportReceiver, TransportSender,
    TransportServer, WebSocketTransport,
};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// How long a client waits before concluding nothing is coming
pub const SILENCE_WINDOW: Duration = Duration::from_millis(300);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

// ============================================================================
// Test Router - RAII wrapper with proper cleanup
// ============================================================================

/// A test router that automatically cleans up on drop
pub struct TestRouter {
    router: Arc<Router>,
    port: u16,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRouter {
    /// Start a test router with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(RouterConfig {
            name: "Test Router".to_string(),
            ..Default::default()
        })
        .await
    }

    /// Start a test router with custom configuration
    pub async fn start_with_config(config: RouterConfig) -> Self {
        let router = Arc::new(Router::new(config));

        // Bind before spawning so the port is listening when we return
        let server = router
            .bind_websocket("127.0.0.1:0")
            .await
            .expect("bind test router");
        let port = server.local_addr().expect("local addr").port();

        let serving = router.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(server).await;
        });

        Self {
            router,
            port,
            handle: Some(handle),
        }
    }

    /// WebSocket URL for a path (and query) on this router
    pub fn url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, path)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Wait until exactly `n` sessions are registered
    pub async fn wait_for_sessions(&self, n: usize) -> bool {
        let router = self.router.clone();
        wait_for(
            || {
                let router = router.clone();
                async move { router.session_count() == n }
            },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await
    }

    /// Connect a private-mode client named `sender`
    pub async fn connect_private(&self, sender: &str) -> TestClient {
        let path = format!("{}?sender={}", self.router.config().path, sender);
        self.connect(&path).await.expect("private connect")
    }

    /// Connect an anonymous broadcast-mode client
    pub async fn connect_broadcast(&self) -> TestClient {
        let path = format!("{}/broadcast", self.router.config().path);
        self.connect(&path).await.expect("broadcast connect")
    }

    /// Connect to an arbitrary path, surfacing upgrade rejections
    pub async fn connect(&self, path: &str) -> Result<TestClient, TransportError> {
        TestClient::connect(&self.url(path)).await
    }

    /// Stop the router explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.router.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// A chat client speaking the wire format directly
pub struct TestClient {
    sender: <WebSocketTransport as Transport>::Sender,
    receiver: <WebSocketTransport as Transport>::Receiver,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (sender, receiver) = WebSocketTransport::connect(url).await?;
        Ok(Self { sender, receiver })
    }

    /// Send a chat message as JSON
    pub async fn send_message(&self, message: &Message) {
        let text = serde_json::to_string(message).expect("encode message");
        self.send_raw(&text).await;
    }

    /// Send an arbitrary text frame
    pub async fn send_raw(&self, text: &str) {
        self.sender
            .send(text.to_string())
            .await
            .expect("send frame");
    }

    /// Next text frame, or None on timeout or disconnect
    pub async fn recv_text(&mut self, max_wait: Duration) -> Option<String> {
        let receiver = &mut self.receiver;
        timeout(max_wait, async {
            loop {
                match receiver.recv().await {
                    Some(TransportEvent::Data(data)) => {
                        return Some(String::from_utf8_lossy(&data).into_owned())
                    }
                    Some(TransportEvent::Connected) => continue,
                    _ => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Next text frame within [`DEFAULT_TIMEOUT`]
    pub async fn expect_text(&mut self) -> String {
        self.recv_text(DEFAULT_TIMEOUT)
            .await
            .expect("expected a text frame")
    }

    /// True if no frame arrives within [`SILENCE_WINDOW`]
    pub async fn expect_silence(&mut self) -> bool {
        self.recv_text(SILENCE_WINDOW).await.is_none()
    }

    /// Wait for the server to close the connection. Frames received first
    /// are returned.
    pub async fn wait_closed(&mut self, max_wait: Duration) -> Option<Vec<String>> {
        let receiver = &mut self.receiver;
        timeout(max_wait, async {
            let mut frames = Vec::new();
            loop {
                match receiver.recv().await {
                    Some(TransportEvent::Data(data)) => {
                        frames.push(String::from_utf8_lossy(&data).into_owned())
                    }
                    Some(TransportEvent::Connected) => continue,
                    Some(TransportEvent::Disconnected { .. })
                    | Some(TransportEvent::Error(_))
                    | None => return frames,
                }
            }
        })
        .await
        .ok()
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}
