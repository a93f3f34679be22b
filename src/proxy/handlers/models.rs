use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::errors::unauthorized_response;
use crate::proxy::common::model_mapping;
use crate::proxy::google::endpoints;
use crate::proxy::state::AppState;

/// `GET /v1/models` — Anthropic-format listing synthesized from the upstream
/// catalog; only Claude and Gemini families are exposed. Falls back to the
/// static catalog when the upstream is unreachable.
pub async fn handle_list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !super::authorized(&state.settings, &headers) {
        return unauthorized_response();
    }

    let ids = fetch_upstream_models(&state)
        .await
        .unwrap_or_else(|| {
            model_mapping::KNOWN_MODELS
                .iter()
                .map(|m| (*m).to_string())
                .collect()
        });

    let data: Vec<Value> = ids
        .iter()
        .filter(|id| model_mapping::is_claude_model(id) || model_mapping::is_gemini_model(id))
        .map(|id| {
            json!({
                "type": "model",
                "id": id,
                "display_name": id,
                "created_at": "2026-01-01T00:00:00Z",
            })
        })
        .collect();

    let first_id = data.first().and_then(|m| m["id"].as_str()).map(String::from);
    let last_id = data.last().and_then(|m| m["id"].as_str()).map(String::from);

    Json(json!({
        "data": data,
        "first_id": first_id,
        "last_id": last_id,
        "has_more": false,
    }))
    .into_response()
}

async fn fetch_upstream_models(state: &AppState) -> Option<Vec<String>> {
    let pick = state.pool.pick_sticky("").await;
    let account = pick.account?;
    let token = state.broker.token_for_account(&account).await.ok()?;

    let resp = state
        .upstream
        .call_with_failover(
            endpoints::METHOD_FETCH_AVAILABLE_MODELS,
            &token,
            &json!({}),
            None,
        )
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body: Value = resp.json().await.ok()?;

    let models = body.get("models")?.as_array()?;
    let ids: Vec<String> = models
        .iter()
        .filter_map(|m| {
            m.get("modelId")
                .or_else(|| m.get("name"))
                .or_else(|| m.get("id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .collect();

    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}
