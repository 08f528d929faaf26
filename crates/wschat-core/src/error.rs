//! Error types for wschat messages

use thiserror::Error;

/// Result type alias for message operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Payload is not a well-formed chat message
    #[error("Please provide 'Receiver' & 'Text' Field to start chat")]
    Decode(String),

    /// A required field is missing or empty
    #[error("Validation error for field '{field}': {tag}")]
    Validation { field: &'static str, tag: &'static str },

    /// Serialization failed
    #[error("encode error: {0}")]
    Encode(String),
}

impl Error {
    /// Missing required field
    pub fn required(field: &'static str) -> Self {
        Error::Validation {
            field,
            tag: "required",
        }
    }

    /// True for errors caused by the client payload (decode or validation)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::Validation { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::Encode(e.to_string())
        } else {
            Error::Decode(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = Error::required("Text");
        assert_eq!(err.to_string(), "Validation error for field 'Text': required");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_decode_message_hides_parser_detail() {
        let err = Error::Decode("expected value at line 1 column 1".into());
        assert_eq!(
            err.to_string(),
            "Please provide 'Receiver' & 'Text' Field to start chat"
        );
    }
}
