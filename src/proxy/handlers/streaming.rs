use axum::{body::Body, http::StatusCode, response::Response};
use bytes::Bytes;
use futures::StreamExt;

use crate::proxy::dispatcher::SseStream;

/// Wraps an SSE byte stream in the response headers streaming clients
/// expect. Mid-stream errors become a terminal SSE error event so the stream
/// always closes cleanly.
pub fn build_sse_response(stream: SseStream, error_event: fn(&str) -> Bytes) -> Response {
    let body_stream = stream.map(move |item| -> Result<Bytes, std::io::Error> {
        match item {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::warn!("[SSE] Mid-stream error surfaced to client: {}", e);
                Ok(error_event(&e))
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body_stream))
        .unwrap()
}

pub fn anthropic_error_event(message: &str) -> Bytes {
    let data = serde_json::json!({
        "type": "error",
        "error": { "type": "api_error", "message": message }
    });
    Bytes::from(format!("event: error\ndata: {}\n\n", data))
}

pub fn openai_error_event(message: &str) -> Bytes {
    let data = serde_json::json!({
        "error": { "message": message, "type": "api_error" }
    });
    Bytes::from(format!("data: {}\n\ndata: [DONE]\n\n", data))
}
