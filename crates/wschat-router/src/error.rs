//! Router error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("sender is required")]
    MissingIdentity,

    #[error("identity already connected: {0}")]
    DuplicateIdentity(String),

    #[error("session limit reached ({0})")]
    CapacityExceeded(usize),

    #[error("session {0} is terminated")]
    SessionTerminated(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] wschat_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] wschat_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
