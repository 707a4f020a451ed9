//! Chat API consumers
//!
//! Message send and history retrieval against the Relay backend. Every
//! call carries the bearer token and routes 401s through the auth-error
//! interceptor before the failure is surfaced.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::client::{ApiBody, ApiClient, RequestOptions};
use crate::auth::{handle_api_auth_error, Session};
use crate::error::{ApiError, AuthErrorType, Error};

#[derive(Debug, Deserialize)]
struct HistoryData {
    messages: Option<Vec<HistoryMessage>>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    role: Option<String>,
    content: Option<String>,
    created_at: Option<String>,
}

fn bearer_token(session: &Session) -> Result<String> {
    session
        .token()
        .map(String::from)
        .context("Not signed in. Run 'relay-cli login <email>' first.")
}

/// Run a failed call through the interceptor, then surface it with the
/// right classification.
fn surface_error(session: &mut Session, error: ApiError) -> anyhow::Error {
    let outcome = handle_api_auth_error(session, &error);
    if outcome.is_auth_error {
        Error::Auth {
            kind: outcome.error_type.unwrap_or(AuthErrorType::InvalidToken),
            message: outcome.user_message,
            action: outcome.action_required,
        }
        .into()
    } else {
        error.into()
    }
}

/// Send a message to a conversation.
pub async fn send_message(
    client: &ApiClient,
    session: &mut Session,
    conversation_id: &str,
    message: &str,
) -> Result<()> {
    let token = bearer_token(session)?;
    let options = RequestOptions::post(json!({
        "conversation_id": conversation_id,
        "message": message,
    }))
    .bearer(&token);

    match client.request("/api/v1/chat/message", options).await {
        Ok(ApiBody::Message { message, task_id }) => {
            match task_id {
                Some(task_id) => println!("{} (task {})", message, task_id),
                None => println!("{}", message),
            }
            Ok(())
        }
        Ok(ApiBody::Data(data)) => {
            // Some deployments answer inline instead of queueing a task.
            let reply = data.get("reply").and_then(|v| v.as_str()).unwrap_or("(no reply)");
            println!("{}", reply);
            Ok(())
        }
        Ok(ApiBody::Raw(value)) => {
            println!("{}", value);
            Ok(())
        }
        Err(error) => Err(surface_error(session, error)),
    }
}

/// Read the most recent messages of a conversation.
pub async fn read_history(
    client: &ApiClient,
    session: &mut Session,
    conversation_id: &str,
    limit: usize,
) -> Result<()> {
    let token = bearer_token(session)?;
    let path = format!("/api/v1/chat/history/{}", conversation_id);

    match client.request(&path, RequestOptions::get().bearer(&token)).await {
        Ok(ApiBody::Data(data)) => {
            let parsed: HistoryData = serde_json::from_value(data).map_err(|e| Error::Fatal {
                message: format!("Unexpected history payload: {e}"),
            })?;
            let messages = parsed.messages.unwrap_or_default();

            let start = messages.len().saturating_sub(limit);
            for message in &messages[start..] {
                let time = message.created_at.as_deref().unwrap_or("");
                let role = message.role.as_deref().unwrap_or("unknown");
                let content = message.content.as_deref().unwrap_or("");
                println!("[{}] {}: {}", time, role, content);
            }
            if messages.is_empty() {
                println!("No messages.");
            }
            Ok(())
        }
        Ok(other) => Err(Error::Fatal {
            message: format!("Unexpected history response: {other:?}"),
        }
        .into()),
        Err(error) => Err(surface_error(session, error)),
    }
}
