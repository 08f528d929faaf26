//! Main router implementation
//!
//! The router is transport-agnostic: it accepts connections from any
//! [`TransportServer`], resolves each upgrade request to an [`Endpoint`],
//! registers the session and starts its I/O loops. A single dispatcher task,
//! started by the first `serve_*` call, routes every inbound message.
//!
//! # Example
//!
//! ```no_run
//! use wschat_router::{Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new(RouterConfig::default());
//!     router.serve_websocket("0.0.0.0:8888").await.unwrap();
//! }
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use wschat_core::{DeliveryFormat, DEFAULT_CHAT_PATH};
use wschat_transport::{
    ConnectInfo, HandshakeGuard, TransportError, TransportReceiver, TransportSender,
    TransportServer,
};

#[cfg(feature = "websocket")]
use wschat_transport::{WebSocketConfig, WebSocketServer};

use crate::{
    connection::{spawn_session, SessionContext},
    dispatch::{Dispatcher, Hub},
    endpoint::{rejection_for, Endpoint},
    error::{Result, RouterError},
    registry::{DuplicateIdentityPolicy, Registry},
    session::Session,
    stats::{RouterStats, StatsSnapshot},
};

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Server name
    pub name: String,
    /// Base path for private sessions; broadcast sessions use `{path}/broadcast`
    pub path: String,
    /// Per-session outbound mailbox capacity
    pub mailbox_capacity: usize,
    /// Capacity of each dispatcher inbound channel
    pub inbound_capacity: usize,
    /// What recipients receive
    pub delivery: DeliveryFormat,
    /// Echo `Error : ...` frames to clients that send malformed payloads
    pub error_frames: bool,
    /// Maximum sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Handling of a second private session with the same identity
    pub duplicate_identity: DuplicateIdentityPolicy,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Upgrade handshake timeout (seconds)
    pub handshake_timeout: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "wschat".to_string(),
            path: DEFAULT_CHAT_PATH.to_string(),
            mailbox_capacity: 32,
            inbound_capacity: 256,
            delivery: DeliveryFormat::Text,
            error_frames: true,
            max_sessions: 0,
            duplicate_identity: DuplicateIdentityPolicy::Replace,
            max_message_size: 64 * 1024,
            handshake_timeout: 5,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(RouterError::Config(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.mailbox_capacity == 0 {
            return Err(RouterError::Config("mailbox_capacity must be > 0".into()));
        }
        if self.inbound_capacity == 0 {
            return Err(RouterError::Config("inbound_capacity must be > 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(RouterError::Config("max_message_size must be > 0".into()));
        }
        Ok(())
    }
}

/// wschat router
pub struct Router {
    config: RouterConfig,
    registry: Arc<Registry>,
    stats: Arc<RouterStats>,
    context: Arc<SessionContext>,
    /// Taken by the first serve call
    dispatcher: Mutex<Option<Dispatcher>>,
    running: RwLock<bool>,
    shutdown: Notify,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let registry = Arc::new(Registry::new(
            config.duplicate_identity,
            config.max_sessions,
        ));
        let stats = Arc::new(RouterStats::new());
        let (inbound, dispatcher) = Dispatcher::new(
            Hub::new(registry.clone(), stats.clone()),
            config.inbound_capacity,
        );

        let context = Arc::new(SessionContext {
            registry: registry.clone(),
            stats: stats.clone(),
            inbound,
            delivery: config.delivery,
            error_frames: config.error_frames,
        });

        Self {
            config,
            registry,
            stats,
            context,
            dispatcher: Mutex::new(Some(dispatcher)),
            running: RwLock::new(false),
            shutdown: Notify::new(),
        }
    }

    // =========================================================================
    // Transport-Agnostic Methods
    // =========================================================================

    /// Serve using any TransportServer implementation.
    ///
    /// Requests the server could not vet during its handshake are resolved
    /// here; ones that do not name a valid endpoint are closed.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        self.start_dispatcher();
        info!("Router accepting connections");
        *self.running.write() = true;

        while *self.running.read() {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, info)) => {
                        self.handle_connection(Arc::new(sender), receiver, info);
                    }
                    Err(TransportError::Rejected(status)) => {
                        debug!("Upgrade refused with HTTP {}", status);
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }

        let _ = server.close().await;
        info!("Router stopped accepting connections");
        Ok(())
    }

    /// Spawn the dispatcher task if it has not been started yet
    fn start_dispatcher(&self) {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            tokio::spawn(dispatcher.run());
        }
    }

    /// Guard that refuses bad requests during the upgrade itself
    pub fn handshake_guard(&self) -> HandshakeGuard {
        let path = self.config.path.clone();
        let registry = self.registry.clone();

        Arc::new(move |info: &ConnectInfo| {
            let endpoint = Endpoint::resolve(info, &path)?;
            registry
                .check_admission(endpoint.mode(), endpoint.identity())
                .map_err(|e| rejection_for(&e))
        })
    }

    // =========================================================================
    // WebSocket Transport
    // =========================================================================

    /// Bind a WebSocket server configured for this router
    #[cfg(feature = "websocket")]
    pub async fn bind_websocket(&self, addr: &str) -> Result<WebSocketServer> {
        let config = WebSocketConfig {
            max_message_size: self.config.max_message_size,
            handshake_timeout: Duration::from_secs(self.config.handshake_timeout),
            ..Default::default()
        };

        Ok(WebSocketServer::bind(addr)
            .await?
            .with_config(config)
            .with_guard(self.handshake_guard()))
    }

    /// Start the router on WebSocket
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let server = self.bind_websocket(addr).await?;
        info!(
            "WebSocket server listening on {} (private: {}, broadcast: {}{})",
            addr,
            self.config.path,
            self.config.path.trim_end_matches('/'),
            wschat_core::BROADCAST_SUFFIX
        );
        self.serve_on(server).await
    }

    /// Handle a new connection
    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        receiver: impl TransportReceiver + 'static,
        info: ConnectInfo,
    ) {
        let endpoint = match Endpoint::resolve(&info, &self.config.path) {
            Ok(endpoint) => endpoint,
            Err(rejection) => {
                warn!(
                    "Closing connection from {} on {}: HTTP {}",
                    info.addr, info.path, rejection.status
                );
                close_in_background(sender);
                return;
            }
        };

        let mode = endpoint.mode();
        let (session, mailbox) = Session::new(
            mode,
            endpoint.into_identity(),
            sender,
            self.config.mailbox_capacity,
        );
        let session = Arc::new(session);

        match self.registry.register(session.clone()) {
            Ok(displaced) => {
                if let Some(previous) = displaced {
                    info!(
                        identity = session.label(),
                        previous = %previous.id,
                        "identity reconnected, closing previous session"
                    );
                    previous.close_mailbox();
                }
            }
            Err(e) => {
                warn!("Refusing session from {}: {}", info.addr, e);
                session.terminate();
                close_in_background(session.transport().clone());
                return;
            }
        }

        self.stats.record_opened();
        info!(
            session = %session.id,
            identity = session.label(),
            ?mode,
            addr = %info.addr,
            "Session registered"
        );

        spawn_session(session, receiver, mailbox, self.context.clone());
    }

    /// Stop accepting connections. A stop issued before serving starts is
    /// kept and ends the next serve call immediately.
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_one();
    }

    /// Registered session count
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

fn close_in_background(sender: Arc<dyn TransportSender>) {
    tokio::spawn(async move {
        if let Err(e) = sender.close().await {
            error!("Close error: {}", e);
        }
    });
}
