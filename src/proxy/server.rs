use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::error::GatewayResult;
use crate::proxy::handlers;
use crate::proxy::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::messages::handle_messages))
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route("/v1/models", get(handlers::models::handle_list_models))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "accounts": state.pool.len().await,
    }))
}

pub async fn serve(state: AppState) -> GatewayResult<()> {
    let port = state.settings.port;
    let app = build_router(state);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("Listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Settings;
    use crate::proxy::broker::CredentialBroker;
    use crate::proxy::dispatcher::Dispatcher;
    use crate::proxy::pool::AccountPool;
    use crate::proxy::upstream::UpstreamClient;
    use crate::proxy::SignatureCache;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let settings = Settings::default();
        let pool = AccountPool::in_memory(vec![], settings.clone());
        let upstream = Arc::new(UpstreamClient::with_base_urls(vec![]));
        let broker = Arc::new(CredentialBroker::new(
            pool.clone(),
            upstream.clone(),
            settings.clone(),
        ));
        let signatures = Arc::new(SignatureCache::with_defaults());
        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            broker.clone(),
            upstream.clone(),
            signatures,
            settings.clone(),
        ));
        AppState {
            pool,
            broker,
            upstream,
            dispatcher,
            settings,
        }
    }

    #[tokio::test]
    async fn health_reports_pool_size() {
        let app = build_router(test_state());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["accounts"], 0);
    }

    #[tokio::test]
    async fn messages_with_no_accounts_is_structured_error() {
        let app = build_router(test_state());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://{}/v1/messages", addr))
            .json(&serde_json::json!({
                "model": "claude-sonnet-4-5",
                "max_tokens": 16,
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "overloaded_error");
    }
}
