use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::errors::{claude_error_response, claude_invalid_request, unauthorized_response};
use super::streaming::{anthropic_error_event, build_sse_response};
use crate::proxy::mappers::claude::ClaudeRequest;
use crate::proxy::state::AppState;

/// `POST /v1/messages` — Anthropic Messages front door.
pub async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !super::authorized(&state.settings, &headers) {
        return unauthorized_response();
    }

    let request: ClaudeRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return claude_invalid_request(format!("invalid request body: {}", e)),
    };

    tracing::info!(
        "Claude request | Model: {} | Stream: {} | Messages: {}",
        request.model,
        request.stream,
        request.messages.len()
    );

    if request.stream {
        match state.dispatcher.send_stream(&request).await {
            Ok(stream) => build_sse_response(stream, anthropic_error_event),
            Err(e) => claude_error_response(&e),
        }
    } else {
        match state.dispatcher.send(&request).await {
            Ok(response) => Json(response).into_response(),
            Err(e) => claude_error_response(&e),
        }
    }
}
