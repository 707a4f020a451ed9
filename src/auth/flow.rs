//! Email-code auth flows and the shared 401 interceptor
//!
//! Access is granted out-of-band: the user requests a code for their email
//! address, then validates it. Both flows are user-driven and
//! single-attempt -- failures surface immediately and the user decides
//! whether to try again.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};

use super::session::Session;
use super::AuthEndpoints;
use crate::api::client::{HttpTransport, TransportResponse};
use crate::error::{server_message, ActionRequired, ApiError, AuthErrorType, Error};

/// Applied when the server omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 30 * 24 * 60 * 60;

/// Per-call timeout for the auth endpoints.
const AUTH_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of validating an access code.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted {
        token: String,
        expires_at: chrono::DateTime<chrono::Utc>,
        days_remaining: i64,
        hours_remaining: i64,
    },
    Rejected {
        error_type: AuthErrorType,
        user_message: String,
        action_required: ActionRequired,
    },
}

/// Classification of a failed authenticated API call.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthErrorOutcome {
    pub is_auth_error: bool,
    pub error_type: Option<AuthErrorType>,
    pub user_message: String,
    pub action_required: ActionRequired,
}

impl AuthErrorOutcome {
    fn not_auth(message: String) -> Self {
        Self {
            is_auth_error: false,
            error_type: None,
            user_message: message,
            action_required: ActionRequired::RetryOrRequestNewToken,
        }
    }
}

/// Client for the token issuance and validation endpoints.
pub struct AuthClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: AuthEndpoints,
    timeout: Duration,
}

impl AuthClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str) -> Self {
        Self {
            transport,
            endpoints: AuthEndpoints::for_base_url(base_url),
            timeout: AUTH_CALL_TIMEOUT,
        }
    }

    /// Single-attempt POST. Connection failures and timeouts come back as
    /// `Error::Transient` with a ready-to-show message.
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<TransportResponse, Error> {
        tracing::debug!("POST {}", url);
        let outcome = tokio::time::timeout(
            self.timeout,
            self.transport.execute(Method::POST, url, headers, Some(&body)),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(Error::Transient {
                message: format!("{e}. Please try again later."),
            }),
            Err(_elapsed) => Err(Error::Transient {
                message: "The server took too long to respond. Please try again later."
                    .to_string(),
            }),
        }
    }

    /// Ask the server to email an access code to `email`.
    pub async fn request_token(&self, email: &str) -> Result<String, Error> {
        let email = email.trim();
        tracing::info!("Requesting access token for {}", email);

        let response = self
            .post(
                &self.endpoints.request_token,
                &[],
                json!({ "email": email }),
            )
            .await?;
        let body: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);

        match response.status {
            200..=299 => Ok(body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Access token requested. Check your email.")
                .to_string()),
            400 => Err(Error::Format {
                message: server_message(&body)
                    .unwrap_or_else(|| "That email address does not look right.".to_string()),
            }),
            429 => Err(Error::RateLimited {
                message: server_message(&body).unwrap_or_else(|| {
                    "Too many requests. Please wait before requesting another token.".to_string()
                }),
            }),
            status => {
                tracing::warn!("Token request failed with HTTP {}", status);
                Err(Error::Transient {
                    message: "The server had a problem. Please try again later.".to_string(),
                })
            }
        }
    }

    /// Validate an emailed access code. On acceptance the session is
    /// replaced and persisted; every rejection carries a user-facing
    /// message and the recovery action.
    pub async fn validate_token(&self, session: &mut Session, code: &str) -> ValidationOutcome {
        let code = code.trim();
        tracing::info!("Validating access token");

        let response = match self
            .post(
                &self.endpoints.validate_token,
                &[],
                json!({ "token": code }),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ValidationOutcome::Rejected {
                    error_type: AuthErrorType::NetworkError,
                    user_message: e.to_string(),
                    action_required: ActionRequired::RetryOrRequestNewToken,
                };
            }
        };
        let body: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);

        match response.status {
            200..=299 => self.accept_or_reject(session, code, &body),
            401 => rejected_from_detail(session, &body),
            400 => ValidationOutcome::Rejected {
                error_type: AuthErrorType::FormatError,
                user_message: server_message(&body).unwrap_or_else(|| {
                    "That token does not look right. Check the code from your email and try again."
                        .to_string()
                }),
                action_required: ActionRequired::RetryOrRequestNewToken,
            },
            status => {
                tracing::warn!("Token validation failed with HTTP {}", status);
                ValidationOutcome::Rejected {
                    error_type: AuthErrorType::NetworkError,
                    user_message: "The server had a problem validating your token. Please try again."
                        .to_string(),
                    action_required: ActionRequired::RetryOrRequestNewToken,
                }
            }
        }
    }

    fn accept_or_reject(
        &self,
        session: &mut Session,
        code: &str,
        body: &Value,
    ) -> ValidationOutcome {
        let valid = body.get("valid").and_then(Value::as_bool).unwrap_or(false);
        if !valid {
            let error_type = body
                .get("error_type")
                .and_then(Value::as_str)
                .and_then(AuthErrorType::parse)
                .unwrap_or(AuthErrorType::ValidationError);
            let user_message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("That token is not valid. Please request a new one.")
                .to_string();
            let action_required = body
                .get("action_required")
                .and_then(Value::as_str)
                .and_then(ActionRequired::parse)
                .unwrap_or(ActionRequired::RequestNewToken);
            return ValidationOutcome::Rejected {
                error_type,
                user_message,
                action_required,
            };
        }

        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = session.now() + chrono::Duration::seconds(expires_in);
        let days_remaining = body
            .get("days_remaining")
            .and_then(Value::as_i64)
            .unwrap_or(expires_in / 86_400);
        let hours_remaining = body
            .get("hours_remaining")
            .and_then(Value::as_i64)
            .unwrap_or(expires_in / 3_600);

        if let Err(e) = session.set_token(code.to_string(), expires_at) {
            // Session stays usable for this process; only persistence is lost.
            tracing::warn!("Validated session could not be persisted: {}", e);
        }

        ValidationOutcome::Accepted {
            token: code.to_string(),
            expires_at,
            days_remaining,
            hours_remaining,
        }
    }

    /// Notify the server, then drop local state. The notification is
    /// best-effort: failures are logged and swallowed.
    pub async fn logout(&self, session: &mut Session) {
        if let Some(token) = session.token() {
            let headers = vec![("Authorization".to_string(), format!("Bearer {token}"))];
            match self.post(&self.endpoints.logout, &headers, json!({})).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    tracing::debug!("Logout acknowledged");
                }
                Ok(response) => {
                    tracing::warn!("Logout notification returned HTTP {}", response.status);
                }
                Err(e) => {
                    tracing::warn!("Logout notification failed: {}", e);
                }
            }
        }
        session.clear();
    }
}

/// A 401 whose structured `detail` names the failure. Evicts the local
/// token for `token_expired`/`invalid_token`, same rule as the
/// interceptor.
fn rejected_from_detail(session: &mut Session, body: &Value) -> ValidationOutcome {
    let detail = body.get("detail").filter(|d| d.is_object());
    let error_type = detail
        .and_then(|d| d.get("error"))
        .and_then(Value::as_str)
        .and_then(AuthErrorType::parse)
        .unwrap_or(AuthErrorType::InvalidToken);
    let user_message = detail
        .and_then(|d| d.get("ui_message").or_else(|| d.get("message")))
        .and_then(Value::as_str)
        .unwrap_or("Your access token was rejected. Please request a new one.")
        .to_string();
    let action_required = detail
        .and_then(|d| d.get("action_required"))
        .and_then(Value::as_str)
        .and_then(ActionRequired::parse)
        .unwrap_or(ActionRequired::RequestNewToken);

    if error_type.evicts_token() {
        tracing::info!("Server invalidated the current token, clearing session");
        session.clear();
    }

    ValidationOutcome::Rejected {
        error_type,
        user_message,
        action_required,
    }
}

/// Decide whether a failed API call should evict the cached token.
///
/// The single point of truth for every authenticated caller: any 401 goes
/// through here before the error is surfaced. Non-401 failures, and 401s
/// without a structured `detail`, leave token state untouched.
pub fn handle_api_auth_error(session: &mut Session, error: &ApiError) -> AuthErrorOutcome {
    if error.status != Some(401) {
        return AuthErrorOutcome::not_auth(error.to_string());
    }
    let Some(detail) = error.detail.as_ref().filter(|d| d.is_object()) else {
        return AuthErrorOutcome::not_auth(error.to_string());
    };

    let error_type = detail
        .get("error")
        .and_then(Value::as_str)
        .and_then(AuthErrorType::parse);
    let user_message = detail
        .get("ui_message")
        .or_else(|| detail.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Your session is no longer valid. Please request a new access token.")
        .to_string();
    let action_required = detail
        .get("action_required")
        .and_then(Value::as_str)
        .and_then(ActionRequired::parse)
        .unwrap_or(ActionRequired::RequestNewToken);

    if error_type.is_some_and(AuthErrorType::evicts_token) {
        tracing::info!("Server invalidated the current token, clearing session");
        session.clear();
    }

    AuthErrorOutcome {
        is_auth_error: true,
        error_type,
        user_message,
        action_required,
    }
}
