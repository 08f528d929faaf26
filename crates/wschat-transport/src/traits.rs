//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// Frame payload received
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending frames
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send a text frame
    async fn send(&self, text: String) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving frames
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Client side of a transport
#[async_trait]
pub trait Transport: Send + Sync {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    /// Connect to a remote endpoint
    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)>
    where
        Self: Sized;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    /// Accept the next upgraded connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, ConnectInfo)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the server
    async fn close(&self) -> Result<()>;
}

/// The request that opened a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Peer address
    pub addr: SocketAddr,
    /// Request path, without the query string
    pub path: String,
    /// Decoded query parameters, in request order
    pub query: Vec<(String, String)>,
}

impl ConnectInfo {
    pub fn new(addr: SocketAddr, path: impl Into<String>, query: Vec<(String, String)>) -> Self {
        Self {
            addr,
            path: path.into(),
            query,
        }
    }

    /// First value of a query parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response refusing an upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    /// JSON body
    pub body: String,
}

impl Rejection {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Decides during the upgrade whether a request may become a connection
pub type HandshakeGuard =
    Arc<dyn Fn(&ConnectInfo) -> std::result::Result<(), Rejection> + Send + Sync>;
