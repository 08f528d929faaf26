//! WebSocket transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse},
        http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
        protocol::{Message as WsMessage, WebSocketConfig as WsConfig},
        Error as WsError,
    },
    WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    ConnectInfo, HandshakeGuard, Rejection, Transport, TransportEvent, TransportReceiver,
    TransportSender, TransportServer,
};

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size
    pub max_message_size: usize,
    /// Upper bound on the upgrade handshake
    pub handshake_timeout: Duration,
    /// Frames buffered between a connection and its I/O tasks
    pub channel_capacity: usize,
    /// How long a closing connection waits for the peer before it is dropped
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64KB
            handshake_timeout: Duration::from_secs(5),
            channel_capacity: 100,
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// WebSocket client transport
pub struct WebSocketTransport;

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
    closing: Arc<watch::Sender<bool>>,
    writer: AbortHandle,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    /// Never waits on the peer. If the close frame cannot be queued the
    /// writer is stopped and the connection dropped.
    async fn close(&self) -> Result<()> {
        let was_connected = std::mem::replace(&mut *self.connected.lock(), false);
        if was_connected {
            if self.tx.try_send(WsMessage::Close(None)).is_err() {
                debug!("WebSocket writer backed up, dropping connection");
                self.writer.abort();
            }
            self.closing.send_replace(true);
        }
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, response) = connect_async(url).await.map_err(TransportError::from)?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, &WebSocketConfig::default()))
    }
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
    guard: Option<HandshakeGuard>,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
            guard: None,
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a guard consulted during every upgrade
    pub fn with_guard(mut self, guard: HandshakeGuard) -> Self {
        self.guard = Some(guard);
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, ConnectInfo)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("Accepted TCP connection from {}", addr);

        let mut ws_config = WsConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);

        let guard = self.guard.clone();
        let mut captured: Option<ConnectInfo> = None;
        let callback = |req: &HsRequest, response: HsResponse| {
            let info = connect_info(addr, req);
            if let Some(guard) = &guard {
                if let Err(rejection) = guard(&info) {
                    debug!(
                        "Refusing upgrade of {} from {}: HTTP {}",
                        info.path, addr, rejection.status
                    );
                    return Err(rejection_response(rejection));
                }
            }
            captured = Some(info);
            Ok(response)
        };

        let handshake =
            tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config));
        let ws_stream = match tokio::time::timeout(self.config.handshake_timeout, handshake).await
        {
            Ok(Ok(ws_stream)) => ws_stream,
            Ok(Err(WsError::Http(response))) => {
                return Err(TransportError::Rejected(response.status().as_u16()));
            }
            Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
            Err(_) => {
                warn!("WebSocket handshake from {} timed out", addr);
                return Err(TransportError::Timeout);
            }
        };

        let info = captured.ok_or_else(|| {
            TransportError::Protocol("upgrade completed without a request".to_string())
        })?;

        info!("WebSocket client connected from {} on {}", addr, info.path);

        let (sender, receiver) = spawn_io(ws_stream, &self.config);
        Ok((sender, receiver, info))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> Result<()> {
        // TCP listener doesn't need explicit close
        Ok(())
    }
}

fn connect_info(addr: SocketAddr, req: &HsRequest) -> ConnectInfo {
    let query = req
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    ConnectInfo::new(addr, req.uri().path(), query)
}

fn rejection_response(rejection: Rejection) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(rejection.body));
    *response.status_mut() =
        StatusCode::from_u16(rejection.status).unwrap_or(StatusCode::BAD_REQUEST);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Split an upgraded stream into a writer task and a reader task bridged by channels.
///
/// Once the connection starts closing, from either side, the reader gives the
/// peer `close_timeout` to finish. After that both tasks stop and the socket
/// is dropped.
fn spawn_io<S>(ws_stream: WebSocketStream<S>, config: &WebSocketConfig) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();
    let capacity = config.channel_capacity.max(1);
    let close_timeout = config.close_timeout;

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    let (closing_tx, closing_rx) = watch::channel(false);
    let closing = Arc::new(closing_tx);
    let closing_write = closing.clone();

    // Writer task
    let writer_task = tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = send_rx.recv().await {
            if matches!(msg, WsMessage::Close(_)) {
                if tokio::time::timeout(close_timeout, write.send(msg)).await.is_err() {
                    debug!("WebSocket close frame timed out");
                }
                break;
            }
            if let Err(e) = write.send(msg).await {
                debug!("WebSocket write error: {}", e);
                break;
            }
        }
        *connected_write.lock() = false;
        closing_write.send_replace(true);
    });
    let writer = writer_task.abort_handle();

    // Reader task
    let writer_read = writer_task.abort_handle();
    tokio::spawn(async move {
        let mut read = read;

        let _ = event_tx.send(TransportEvent::Connected).await;

        let grace = close_grace(closing_rx, close_timeout);
        tokio::pin!(grace);

        let mut reason = None;
        loop {
            let next = tokio::select! {
                next = read.next() => next,
                _ = &mut grace => {
                    debug!("WebSocket peer did not finish closing, dropping connection");
                    writer_read.abort();
                    reason = Some("close timed out".to_string());
                    break;
                }
            };
            let Some(result) = next else { break };

            match result {
                Ok(WsMessage::Text(text)) => {
                    if event_tx
                        .send(TransportEvent::Data(Bytes::from(text)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(WsMessage::Binary(data)) => {
                    if event_tx
                        .send(TransportEvent::Data(Bytes::from(data)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                    // Pong is handled automatically by tungstenite
                }
                Ok(WsMessage::Close(frame)) => {
                    reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    reason = Some(e.to_string());
                    break;
                }
            }
        }

        *connected_read.lock() = false;
        let _ = event_tx
            .send(TransportEvent::Disconnected { reason })
            .await;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
        closing,
        writer,
    };

    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

/// Resolves `grace` after the connection starts closing
async fn close_grace(mut closing: watch::Receiver<bool>, grace: Duration) {
    while !*closing.borrow_and_update() {
        if closing.changed().await.is_err() {
            // Nothing left to signal a close
            std::future::pending::<()>().await;
        }
    }
    tokio::time::sleep(grace).await;
}
