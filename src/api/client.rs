//! Fault-tolerant HTTP request layer for the Relay backend
//!
//! Wraps a transport with a per-attempt timeout, a retry budget with
//! linear backoff, and normalization of the backend's heterogeneous
//! response envelopes. The layer never touches token state; callers attach
//! the bearer header and run 401s through the auth interceptor themselves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

use crate::error::ApiError;

/// Transport seam under the retry layer. One call, one attempt; retries,
/// timeouts, and response interpretation live above it.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<TransportResponse, TransportError>;
}

/// Raw response from one attempt: status plus the unparsed body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Network-level failure (DNS, refused connection, broken transfer).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

/// Production transport over `reqwest`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.http.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| TransportError {
            message: format!("Cannot connect to the server: {e}"),
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError {
            message: format!("Failed to read response body: {e}"),
        })?;

        Ok(TransportResponse { status, body })
    }
}

/// Retry policy as a pure value: the predicate and the delay are plain
/// functions of the attempt number, so the policy is testable without
/// timers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn attempts_for(&self, no_retry: bool) -> u32 {
        if no_retry {
            1
        } else {
            self.max_attempts
        }
    }

    /// Linear backoff: the delay after attempt `n` is `base * n`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Retry only transient outcomes: no status at all (network-level
    /// failure), 5xx, or 408. Every other 4xx is a client error and
    /// terminates immediately.
    pub fn should_retry(status: Option<u16>) -> bool {
        match status {
            None => true,
            Some(status) => status >= 500 || status == 408,
        }
    }
}

/// Options for one logical request.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Per-attempt timeout override; the policy default applies otherwise.
    pub timeout: Option<Duration>,
    pub no_retry: bool,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.headers
            .push(("Authorization".to_string(), format!("Bearer {token}")));
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }
}

/// Successful response, resolved to one of the backend's envelope shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    /// `{success: true, data: {...}}`
    Data(Value),
    /// `{success: true, message, task_id}`
    Message {
        message: String,
        task_id: Option<String>,
    },
    /// Endpoints that never adopted the envelope.
    Raw(Value),
}

/// Retrying client for the Relay API.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    base_url: String,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str) -> Self {
        Self::with_policy(transport, base_url, RetryPolicy::default())
    }

    pub fn with_policy(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            policy,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Issue one logical request. Attempts are strictly sequential; each
    /// races the transport against the timeout, transient failures are
    /// retried up to the budget with linear backoff between attempts, and
    /// the error of the final attempt is surfaced as-is.
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiBody, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts = self.policy.attempts_for(options.no_retry);
        let attempt_timeout = options.timeout.unwrap_or(self.policy.timeout);

        let mut attempt = 1u32;
        loop {
            tracing::debug!(
                "{} {} (attempt {}/{})",
                options.method,
                url,
                attempt,
                max_attempts
            );

            let outcome = tokio::time::timeout(
                attempt_timeout,
                self.transport.execute(
                    options.method.clone(),
                    &url,
                    &options.headers,
                    options.body.as_ref(),
                ),
            )
            .await;

            let error = match outcome {
                Ok(Ok(response)) => {
                    if (200..300).contains(&response.status) {
                        return process_response(path, response.status, &response.body);
                    }
                    ApiError::http(path, response.status, &response.body)
                }
                Ok(Err(transport_error)) => ApiError::network(path, transport_error.message),
                Err(_elapsed) => ApiError::timeout(path),
            };

            if attempt >= max_attempts || !RetryPolicy::should_retry(error.status) {
                return Err(error);
            }

            let delay = self.policy.backoff_delay(attempt);
            tracing::warn!("{} failed ({}), retrying in {:?}", path, error, delay);
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

/// Resolve a 2xx body against the known envelope shapes, in priority
/// order: data envelope, message envelope, raw passthrough, failure.
/// Anything else is an unrecognized shape and is surfaced immediately.
pub fn process_response(endpoint: &str, status: u16, body: &str) -> Result<ApiBody, ApiError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        ApiError::unrecognized(endpoint, status, &format!("body is not valid JSON ({e})"))
    })?;

    match value.get("success").and_then(Value::as_bool) {
        Some(true) => {
            if let Some(data) = value.get("data") {
                Ok(ApiBody::Data(data.clone()))
            } else if let Some(message) = value.get("message").and_then(Value::as_str) {
                let task_id = value
                    .get("task_id")
                    .and_then(Value::as_str)
                    .map(String::from);
                Ok(ApiBody::Message {
                    message: message.to_string(),
                    task_id,
                })
            } else {
                Err(ApiError::unrecognized(
                    endpoint,
                    status,
                    "success response carries neither data nor message",
                ))
            }
        }
        Some(false) => {
            let message = value
                .get("error")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str);
            match message {
                Some(message) => Err(ApiError {
                    message: message.to_string(),
                    status: Some(status),
                    endpoint: endpoint.to_string(),
                    detail: None,
                }),
                None => Err(ApiError::unrecognized(
                    endpoint,
                    status,
                    "failure response carries neither error nor message",
                )),
            }
        }
        None => {
            if value.get("error").is_none() {
                Ok(ApiBody::Raw(value))
            } else {
                Err(ApiError::unrecognized(
                    endpoint,
                    status,
                    "error present without a success flag",
                ))
            }
        }
    }
}
