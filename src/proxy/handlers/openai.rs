use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::errors::{openai_error_response, openai_invalid_request, unauthorized_response};
use super::streaming::{build_sse_response, openai_error_event};
use crate::proxy::mappers::openai::{
    create_openai_chunk_stream, to_claude_request, to_openai_response, OpenAIRequest,
};
use crate::proxy::state::AppState;

/// `POST /v1/chat/completions` — OpenAI front door; everything funnels
/// through the internal Anthropic request shape.
pub async fn handle_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !super::authorized(&state.settings, &headers) {
        return unauthorized_response();
    }

    let openai_request: OpenAIRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return openai_invalid_request(format!("invalid request body: {}", e)),
    };

    let claude_request = match to_claude_request(&openai_request, &state.settings) {
        Ok(r) => r,
        Err(e) => return openai_invalid_request(e),
    };

    tracing::info!(
        "OpenAI request | Model: {} -> {} | Stream: {}",
        openai_request.model,
        claude_request.model,
        openai_request.stream
    );

    if openai_request.stream {
        match state.dispatcher.send_stream(&claude_request).await {
            Ok(stream) => {
                let chunks = create_openai_chunk_stream(stream, openai_request.model.clone());
                build_sse_response(chunks, openai_error_event)
            }
            Err(e) => openai_error_response(&e),
        }
    } else {
        match state.dispatcher.send(&claude_request).await {
            Ok(response) => {
                Json(to_openai_response(&response, &openai_request.model)).into_response()
            }
            Err(e) => openai_error_response(&e),
        }
    }
}
