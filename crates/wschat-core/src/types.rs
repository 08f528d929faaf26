//! Chat message types

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Client-supplied identity, taken from the `sender` query parameter
pub type Identity = String;

/// A chat message.
///
/// An empty `receiver` means broadcast. `sender` is informational only and is
/// never used for routing. Field names are also accepted capitalized
/// (`Receiver`, `Text`), as clients are told to send them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, alias = "Sender", alias = "SENDER")]
    pub sender: String,
    #[serde(default, alias = "Receiver", alias = "RECEIVER")]
    pub receiver: String,
    #[serde(default, alias = "Text", alias = "TEXT")]
    pub text: String,
}

impl Message {
    /// A message for every broadcast member
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A message for a single named peer
    pub fn private(receiver: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Whether this message is routed to the broadcast group
    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.text.is_empty() {
            return Err(Error::required("Text"));
        }
        Ok(())
    }
}

/// How a message is written to its recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFormat {
    /// Only the message text, as a plain text frame
    #[default]
    Text,
    /// The full message as a JSON object
    Json,
}

impl std::str::FromStr for DeliveryFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(DeliveryFormat::Text),
            "json" => Ok(DeliveryFormat::Json),
            other => Err(format!("unknown delivery format: {}", other)),
        }
    }
}

impl std::fmt::Display for DeliveryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFormat::Text => write!(f, "text"),
            DeliveryFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_mode() {
        assert!(Message::broadcast("hello all").is_broadcast());
        assert!(!Message::private("user2", "hi").is_broadcast());
    }

    #[test]
    fn test_validate_requires_text() {
        assert!(Message::private("user2", "").validate().is_err());
        assert!(Message::broadcast("x").validate().is_ok());
    }

    #[test]
    fn test_delivery_format_parse() {
        assert_eq!("JSON".parse::<DeliveryFormat>(), Ok(DeliveryFormat::Json));
        assert_eq!("text".parse::<DeliveryFormat>(), Ok(DeliveryFormat::Text));
        assert!("xml".parse::<DeliveryFormat>().is_err());
    }
}
