//! HTTP front door: routes requests to the session's agent and streams replies as SSE.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{EventStream, SessionRegistry};
use crate::error::{AgentError, ErrorCategory};
use crate::types::{Message, Role, ToolDecision};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions: Arc::new(sessions),
        }
    }
}

/// Build the router. Unmatched paths answer 404 `Not found`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check-open-ai-key", get(check_key_handler))
        .route("/agents/chat/{session}", post(chat_handler))
        .route("/agents/chat/{session}/messages", get(messages_handler))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<Message>,
    /// Decisions outside message metadata, applied to the latest user message.
    #[serde(default)]
    decisions: BTreeMap<String, ToolDecision>,
}

async fn check_key_handler() -> impl IntoResponse {
    Json(json!({ "success": true }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

async fn chat_handler(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, ApiError> {
    let messages = attach_decisions(request.messages, request.decisions)?;
    debug!(session = %session, messages = messages.len(), "chat request");

    let agent = state.sessions.get_or_create(&session).await?;
    let events = agent
        .on_chat_message(messages, None, CancellationToken::new())
        .await?;
    Ok(SseResponse::new(events))
}

async fn messages_handler(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let agent = state.sessions.get_or_create(&session).await?;
    Ok(Json(agent.messages().await?))
}

fn attach_decisions(
    mut messages: Vec<Message>,
    decisions: BTreeMap<String, ToolDecision>,
) -> Result<Vec<Message>, AgentError> {
    if decisions.is_empty() {
        return Ok(messages);
    }
    let latest_user = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::User)
        .ok_or_else(|| {
            AgentError::InvalidArgument("decisions require a user message in the batch".into())
        })?;
    latest_user.metadata.tool_decisions.extend(decisions);
    Ok(messages)
}

/// UI message stream over server-sent events.
///
/// Each event is one `data:` frame; the stream closes with `data: [DONE]`.
pub struct SseResponse {
    events: EventStream,
}

impl SseResponse {
    pub fn new(events: EventStream) -> Self {
        Self { events }
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let frames = self
            .events
            .map(|event| match serde_json::to_string(&event) {
                Ok(json) => format!("data: {json}\n\n"),
                Err(err) => {
                    warn!(error = %err, "dropping unserializable event");
                    String::new()
                }
            })
            .chain(stream::once(async { "data: [DONE]\n\n".to_string() }))
            .map(Ok::<_, Infallible>);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::HeaderName::from_static("x-vercel-ai-ui-message-stream"), "v1"),
            ],
            Body::from_stream(frames),
        )
            .into_response()
    }
}

/// JSON error body with a status derived from the error kind.
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, retryable = self.0.is_retryable(), "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Upstream model failures surface as gateway errors.
fn status_for(err: &AgentError) -> StatusCode {
    match err.category() {
        ErrorCategory::Client => StatusCode::BAD_REQUEST,
        ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Authentication | ErrorCategory::Network | ErrorCategory::Server => {
            StatusCode::BAD_GATEWAY
        }
        ErrorCategory::Configuration => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::ToolExecution | ErrorCategory::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decisions_land_on_latest_user_message() {
        let batch = vec![
            Message::user("first").with_id("u1"),
            Message::assistant(Vec::new()).with_id("a1"),
            Message::user("second").with_id("u2"),
        ];
        let decisions = BTreeMap::from([("c1".to_string(), ToolDecision::Approved)]);
        let out = attach_decisions(batch, decisions).unwrap();
        assert!(out[0].metadata.tool_decisions.is_empty());
        assert_eq!(
            out[2].metadata.tool_decisions.get("c1"),
            Some(&ToolDecision::Approved)
        );
    }

    #[test]
    fn decisions_without_user_message_are_rejected() {
        let decisions = BTreeMap::from([("c1".to_string(), ToolDecision::Denied)]);
        let err = attach_decisions(Vec::new(), decisions).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[test]
    fn status_follows_error_category() {
        let cases = [
            (AgentError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (AgentError::Schedule("bad cron".into()), StatusCode::BAD_REQUEST),
            (AgentError::RateLimited { retry_after_ms: None }, StatusCode::TOO_MANY_REQUESTS),
            (AgentError::api(503, "down"), StatusCode::BAD_GATEWAY),
            (AgentError::Authentication("bad key".into()), StatusCode::BAD_GATEWAY),
            (AgentError::Configuration("no url".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AgentError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
