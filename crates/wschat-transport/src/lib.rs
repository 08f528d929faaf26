//! wschat Transport Layer
//!
//! The relay core only sees the traits in [`traits`]: a sender that writes
//! text frames, a receiver that yields [`TransportEvent`]s, and a server that
//! accepts upgraded connections together with the request that produced them.
//!
//! The WebSocket implementation (default feature) runs the upgrade handshake,
//! consults an optional [`HandshakeGuard`] so that bad requests are refused
//! with a plain HTTP response, and is also usable as a client.

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{
    ConnectInfo, HandshakeGuard, Rejection, Transport, TransportEvent, TransportReceiver,
    TransportSender, TransportServer,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketServer, WebSocketTransport};
