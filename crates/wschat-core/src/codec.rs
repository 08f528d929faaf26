//! JSON codec for chat messages
//!
//! Inbound frames are decoded and validated in one step; a frame that fails
//! either check never reaches the router. Outbound frames are produced in the
//! configured [`DeliveryFormat`].

use crate::types::{DeliveryFormat, Message};
use crate::{Result, ERROR_FRAME_PREFIX};

/// Decode and validate an inbound frame
pub fn decode(data: &[u8]) -> Result<Message> {
    let message: Message = serde_json::from_slice(data)?;
    message.validate()?;
    Ok(message)
}

/// Encode a message as a JSON object
pub fn encode(message: &Message) -> Result<String> {
    serde_json::to_string(message).map_err(|e| crate::Error::Encode(e.to_string()))
}

/// Encode a message for delivery to a recipient
pub fn encode_outbound(message: &Message, format: DeliveryFormat) -> Result<String> {
    match format {
        DeliveryFormat::Text => Ok(message.text.clone()),
        DeliveryFormat::Json => encode(message),
    }
}

/// Diagnostic frame written back to a client whose payload was rejected
pub fn error_frame(error: &crate::Error) -> String {
    format!("{}{}", ERROR_FRAME_PREFIX, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_private() {
        let msg = decode(br#"{"receiver":"user2","text":"hi"}"#).unwrap();
        assert_eq!(msg.receiver, "user2");
        assert_eq!(msg.text, "hi");
        assert!(msg.sender.is_empty());
    }

    #[test]
    fn test_text_only_outbound() {
        let msg = Message::private("user3", "yo").with_sender("user1");
        assert_eq!(encode_outbound(&msg, DeliveryFormat::Text).unwrap(), "yo");
    }
}
