//! Error taxonomy for auth flows and API calls
//!
//! Classification drives recovery: `Transient` failures are retried by the
//! request layer, `Format` and `RateLimited` go back to the user, auth
//! failures may evict the cached token, and `Fatal` shapes stop everything.

use serde_json::Value;
use thiserror::Error;

/// Server-reported auth failure categories (the `error_type` /
/// `detail.error` wire strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorType {
    TokenExpired,
    InvalidToken,
    TokenNotFound,
    FormatError,
    MissingToken,
    NetworkError,
    ServerError,
    ValidationError,
}

impl AuthErrorType {
    /// Parse the wire string; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "token_expired" => Some(Self::TokenExpired),
            "invalid_token" => Some(Self::InvalidToken),
            "token_not_found" => Some(Self::TokenNotFound),
            "format_error" => Some(Self::FormatError),
            "missing_token" => Some(Self::MissingToken),
            "network_error" => Some(Self::NetworkError),
            "server_error" => Some(Self::ServerError),
            "validation_error" => Some(Self::ValidationError),
            _ => None,
        }
    }

    /// Whether this failure must evict the locally cached token.
    /// `token_not_found`/`missing_token` only block the call.
    pub fn evicts_token(self) -> bool {
        matches!(self, Self::TokenExpired | Self::InvalidToken)
    }
}

/// What the UI should offer the user after an auth failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequired {
    RequestNewToken,
    RetryOrRequestNewToken,
}

impl ActionRequired {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request_new_token" => Some(Self::RequestNewToken),
            "retry_or_request_new_token" => Some(Self::RetryOrRequestNewToken),
            _ => None,
        }
    }
}

/// Failure of an auth flow or an authenticated consumer, pre-classified so
/// presentation code never branches on raw status codes. Every variant
/// carries a message ready to show the user.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input; corrected and resubmitted, never retried as-is.
    #[error("{message}")]
    Format { message: String },

    /// The server rejected the credential itself.
    #[error("{message}")]
    Auth {
        kind: AuthErrorType,
        message: String,
        action: ActionRequired,
    },

    /// HTTP 429; the caller backs off before trying again.
    #[error("{message}")]
    RateLimited { message: String },

    /// Network or server trouble that is safe to try again.
    #[error("{message}")]
    Transient { message: String },

    /// Response shape no caller can act on. Never retried.
    #[error("{message}")]
    Fatal { message: String },
}

/// Failure to persist the session to durable storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to write session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Terminal failure from the fault-tolerant request layer.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    /// HTTP status of the last attempt; absent on network-level failures.
    pub status: Option<u16>,
    /// Path the request was issued against.
    pub endpoint: String,
    /// Structured `detail` body, when the server sent one.
    pub detail: Option<Value>,
}

impl ApiError {
    /// Network-level failure: no response, no status.
    pub fn network(endpoint: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            endpoint: endpoint.to_string(),
            detail: None,
        }
    }

    /// An attempt that outlived its timeout. Surfaced as status 408 so the
    /// retry predicate treats it like any other transient failure.
    pub fn timeout(endpoint: &str) -> Self {
        Self {
            message: format!("Request to {endpoint} timed out"),
            status: Some(408),
            endpoint: endpoint.to_string(),
            detail: None,
        }
    }

    /// Non-2xx response. Pulls the most specific server-supplied message
    /// out of the body and keeps the structured `detail` for the
    /// auth-error interceptor.
    pub fn http(endpoint: &str, status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let detail = parsed.as_ref().and_then(|v| v.get("detail")).cloned();
        let message = parsed
            .as_ref()
            .and_then(server_message)
            .unwrap_or_else(|| format!("HTTP {status} for {endpoint}"));
        Self {
            message,
            status: Some(status),
            endpoint: endpoint.to_string(),
            detail,
        }
    }

    /// A 2xx body that matches none of the known envelope shapes.
    pub fn unrecognized(endpoint: &str, status: u16, why: &str) -> Self {
        Self {
            message: format!("Unrecognized response from {endpoint}: {why}"),
            status: Some(status),
            endpoint: endpoint.to_string(),
            detail: None,
        }
    }
}

/// Most specific user-facing message in an error body: `detail` as a bare
/// string, `detail.ui_message`, `detail.message`, then the top-level
/// `error`/`message` fields.
pub(crate) fn server_message(body: &Value) -> Option<String> {
    if let Some(detail) = body.get("detail") {
        if let Some(s) = detail.as_str() {
            return Some(s.to_string());
        }
        if let Some(s) = detail
            .get("ui_message")
            .or_else(|| detail.get("message"))
            .and_then(Value::as_str)
        {
            return Some(s.to_string());
        }
    }
    body.get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_type_parse() {
        assert_eq!(
            AuthErrorType::parse("token_expired"),
            Some(AuthErrorType::TokenExpired)
        );
        assert_eq!(
            AuthErrorType::parse("validation_error"),
            Some(AuthErrorType::ValidationError)
        );
        assert_eq!(AuthErrorType::parse("something_else"), None);
    }

    #[test]
    fn test_eviction_rule() {
        assert!(AuthErrorType::TokenExpired.evicts_token());
        assert!(AuthErrorType::InvalidToken.evicts_token());
        assert!(!AuthErrorType::TokenNotFound.evicts_token());
        assert!(!AuthErrorType::MissingToken.evicts_token());
    }

    #[test]
    fn test_server_message_precedence() {
        let body: Value = serde_json::from_str(
            r#"{"detail":{"ui_message":"shown","message":"hidden"},"error":"also hidden"}"#,
        )
        .unwrap();
        assert_eq!(server_message(&body).as_deref(), Some("shown"));

        let body: Value = serde_json::from_str(r#"{"detail":"plain detail"}"#).unwrap();
        assert_eq!(server_message(&body).as_deref(), Some("plain detail"));

        let body: Value = serde_json::from_str(r#"{"error":"top-level"}"#).unwrap();
        assert_eq!(server_message(&body).as_deref(), Some("top-level"));

        let body: Value = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert_eq!(server_message(&body), None);
    }

    #[test]
    fn test_http_error_keeps_detail_for_interceptor() {
        let err = ApiError::http(
            "/api/v1/chat/message",
            401,
            r#"{"detail":{"error":"token_expired","ui_message":"Expired."}}"#,
        );
        assert_eq!(err.status, Some(401));
        assert_eq!(err.endpoint, "/api/v1/chat/message");
        assert_eq!(err.message, "Expired.");
        assert!(err.detail.is_some());
    }
}
