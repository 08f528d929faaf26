//! wschat Core
//!
//! Message contract and wire encoding for the wschat relay.
//!
//! This crate provides:
//! - The chat [`Message`] exchanged in both directions
//! - JSON decoding with field validation ([`codec::decode`])
//! - Outbound encoding in either text-only or full-message form ([`DeliveryFormat`])
//! - Diagnostic error frames sent back to misbehaving clients

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode, encode, encode_outbound, error_frame};
pub use error::{Error, Result};
pub use types::*;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8888;

/// Default base path for chat upgrades
pub const DEFAULT_CHAT_PATH: &str = "/wschat";

/// Suffix appended to the base path for broadcast-only sessions
pub const BROADCAST_SUFFIX: &str = "/broadcast";

/// Query parameter carrying the client identity
pub const SENDER_PARAM: &str = "sender";

/// Prefix of diagnostic frames written back to a client before it is dropped
pub const ERROR_FRAME_PREFIX: &str = "Error : ";
