use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::GatewayError;

/// Anthropic-format error envelope.
pub fn claude_error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        Json(json!({
            "type": "error",
            "error": {
                "type": err.client_kind(),
                "message": err.to_string(),
            }
        })),
    )
        .into_response()
}

pub fn claude_invalid_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": message.into(),
            }
        })),
    )
        .into_response()
}

/// OpenAI-format error envelope.
pub fn openai_error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        Json(json!({
            "error": {
                "message": err.to_string(),
                "type": err.client_kind(),
                "code": err.http_status(),
            }
        })),
    )
        .into_response()
}

pub fn openai_invalid_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "message": message.into(),
                "type": "invalid_request_error",
                "code": 400,
            }
        })),
    )
        .into_response()
}

pub fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "type": "error",
            "error": {
                "type": "authentication_error",
                "message": "invalid or missing API key",
            }
        })),
    )
        .into_response()
}
