//! Upgrade request resolution
//!
//! Maps an upgrade request to the kind of session it opens:
//!
//! - `{base}?sender=<identity>` opens a private session
//! - `{base}/broadcast[?sender=<identity>]` joins the broadcast group
//!
//! Anything else is refused with an HTTP error before a session exists.

use serde_json::json;
use wschat_core::{Identity, BROADCAST_SUFFIX, SENDER_PARAM};
use wschat_transport::{ConnectInfo, Rejection};

use crate::error::RouterError;
use crate::session::SessionMode;

/// The session an accepted upgrade request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Private(Identity),
    Broadcast(Option<Identity>),
}

impl Endpoint {
    /// Resolve a request against the configured base path
    pub fn resolve(info: &ConnectInfo, base_path: &str) -> Result<Self, Rejection> {
        let base = normalize(base_path);
        let path = normalize(&info.path);
        let sender = info
            .param(SENDER_PARAM)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if path == base {
            return sender.map(Endpoint::Private).ok_or_else(sender_required);
        }

        let broadcast = format!("{}{}", base.trim_end_matches('/'), BROADCAST_SUFFIX);
        if path == broadcast {
            return Ok(Endpoint::Broadcast(sender));
        }

        Err(not_found())
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            Endpoint::Private(_) => SessionMode::Private,
            Endpoint::Broadcast(_) => SessionMode::Broadcast,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Endpoint::Private(identity) => Some(identity),
            Endpoint::Broadcast(identity) => identity.as_deref(),
        }
    }

    pub fn into_identity(self) -> Option<Identity> {
        match self {
            Endpoint::Private(identity) => Some(identity),
            Endpoint::Broadcast(identity) => identity,
        }
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

pub fn sender_required() -> Rejection {
    Rejection::new(400, json!({ "error": "sender is required" }).to_string())
}

pub fn not_found() -> Rejection {
    Rejection::new(
        404,
        json!({ "code": "PAGE_NOT_FOUND", "message": "Page not found" }).to_string(),
    )
}

/// HTTP refusal for a registry admission error
pub fn rejection_for(err: &RouterError) -> Rejection {
    let status = match err {
        RouterError::MissingIdentity => return sender_required(),
        RouterError::DuplicateIdentity(_) => 409,
        RouterError::CapacityExceeded(_) => 503,
        _ => 500,
    };
    Rejection::new(status, json!({ "error": err.to_string() }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, sender: Option<&str>) -> ConnectInfo {
        let query = sender
            .map(|s| vec![(SENDER_PARAM.to_string(), s.to_string())])
            .unwrap_or_default();
        ConnectInfo::new("127.0.0.1:5555".parse().unwrap(), path, query)
    }

    #[test]
    fn test_private_endpoint() {
        let endpoint = Endpoint::resolve(&request("/wschat", Some("user1")), "/wschat").unwrap();
        assert_eq!(endpoint, Endpoint::Private("user1".into()));
        assert_eq!(endpoint.mode(), SessionMode::Private);
    }

    #[test]
    fn test_private_requires_sender() {
        for sender in [None, Some("")] {
            let rejection = Endpoint::resolve(&request("/wschat", sender), "/wschat").unwrap_err();
            assert_eq!(rejection.status, 400);
            assert_eq!(rejection.body, r#"{"error":"sender is required"}"#);
        }
    }

    #[test]
    fn test_broadcast_endpoint() {
        let anonymous = Endpoint::resolve(&request("/wschat/broadcast", None), "/wschat").unwrap();
        assert_eq!(anonymous, Endpoint::Broadcast(None));

        let named =
            Endpoint::resolve(&request("/wschat/broadcast/", Some("b1")), "/wschat/").unwrap();
        assert_eq!(named.identity(), Some("b1"));
        assert_eq!(named.mode(), SessionMode::Broadcast);
    }

    #[test]
    fn test_unknown_path() {
        let rejection = Endpoint::resolve(&request("/chat", Some("x")), "/wschat").unwrap_err();
        assert_eq!(rejection.status, 404);
        let body: serde_json::Value = serde_json::from_str(&rejection.body).unwrap();
        assert_eq!(body["code"], "PAGE_NOT_FOUND");
    }

    #[test]
    fn test_admission_rejections() {
        assert_eq!(rejection_for(&RouterError::CapacityExceeded(10)).status, 503);
        assert_eq!(
            rejection_for(&RouterError::DuplicateIdentity("user1".into())).status,
            409
        );
        assert_eq!(rejection_for(&RouterError::MissingIdentity).status, 400);
    }
}
