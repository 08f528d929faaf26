//! wschat Router
//!
//! The connection hub of the wschat relay:
//! - Registry of live sessions, by identity (private) and by membership (broadcast)
//! - A single dispatcher task that routes each message to its recipients
//! - Two I/O tasks per session, decoupled from routing by a bounded mailbox
//! - Backpressure-as-disconnect: a recipient whose mailbox is full is dropped
//!   rather than allowed to stall everyone else
//!
//! # Example
//!
//! ```no_run
//! use wschat_router::{Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new(RouterConfig::default());
//!     router.serve_websocket("0.0.0.0:8888").await?;
//!     Ok(())
//! }
//! ```

mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod router;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testing;

pub use dispatch::{Dispatcher, Hub, Inbound, InboundSender};
pub use endpoint::Endpoint;
pub use error::{Result, RouterError};
pub use registry::{DuplicateIdentityPolicy, Registry};
pub use router::{Router, RouterConfig};
pub use session::{DeliveryFailure, Session, SessionId, SessionMode, SessionState};
pub use stats::{RouterStats, StatsSnapshot};
