// Upstream dispatcher: account selection, endpoint failover, retry loop,
// and error classification for a single client request.
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

use crate::error::{GatewayError, GatewayResult};
use crate::models::Settings;
use crate::proxy::broker::CredentialBroker;
use crate::proxy::common::model_mapping;
use crate::proxy::google::endpoints;
use crate::proxy::mappers::claude::{
    collect_stream_to_response, create_anthropic_sse_stream, transform_claude_request,
    ClaudeRequest, ClaudeResponse, StreamContext, TranslationOptions,
};
use crate::proxy::pool::AccountPool;
use crate::proxy::rate_limit;
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::SignatureCache;

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

enum Reply {
    Json(ClaudeResponse),
    Stream(SseStream),
}

const TRANSIENT_BACKOFF: Duration = Duration::from_secs(1);
const FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Dispatcher {
    pool: Arc<AccountPool>,
    broker: Arc<CredentialBroker>,
    upstream: Arc<UpstreamClient>,
    signatures: Arc<SignatureCache>,
    settings: Settings,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<AccountPool>,
        broker: Arc<CredentialBroker>,
        upstream: Arc<UpstreamClient>,
        signatures: Arc<SignatureCache>,
        settings: Settings,
    ) -> Self {
        Self {
            pool,
            broker,
            upstream,
            signatures,
            settings,
        }
    }

    pub async fn send(&self, req: &ClaudeRequest) -> GatewayResult<ClaudeResponse> {
        match self.dispatch(req.clone(), false, true).await? {
            Reply::Json(resp) => Ok(resp),
            Reply::Stream(stream) => collect_stream_to_response(stream)
                .await
                .map_err(GatewayError::Translation),
        }
    }

    pub async fn send_stream(&self, req: &ClaudeRequest) -> GatewayResult<SseStream> {
        match self.dispatch(req.clone(), true, true).await? {
            Reply::Stream(stream) => Ok(stream),
            // Streaming dispatch always hands back a stream.
            Reply::Json(_) => Err(GatewayError::Translation(
                "internal: non-stream reply for a streaming request".to_string(),
            )),
        }
    }

    fn dispatch(
        &self,
        req: ClaudeRequest,
        streaming: bool,
        allow_fallback: bool,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<Reply>> + Send + '_>> {
        Box::pin(async move {
            let model = req.model.clone();
            let pool_len = self.pool.len().await;
            if pool_len == 0 {
                return Err(GatewayError::NoAccounts);
            }

            let trace_id = crate::proxy::common::generate_random_id().to_lowercase();
            let trace_id = trace_id[..6.min(trace_id.len())].to_string();
            let max_attempts = self.settings.max_retries.max(pool_len + 1);
            let mut last_error = String::from("no attempt made");

            tracing::info!(
                "[{}] Dispatch | Model: {} | Stream: {} | Accounts: {}",
                trace_id,
                model,
                streaming,
                pool_len
            );

            for _attempt in 0..max_attempts {
                let pick = self.pool.pick_sticky(&model).await;
                let account = match pick.account {
                    Some(account) => account,
                    None if pick.wait_ms > 0 => {
                        tracing::info!(
                            "[{}] Sticky account cooling down, sleeping {}ms",
                            trace_id,
                            pick.wait_ms
                        );
                        sleep(Duration::from_millis(pick.wait_ms as u64)).await;
                        continue;
                    }
                    None => return Err(GatewayError::NoAccounts),
                };

                if self.pool.is_all_rate_limited(Some(&model)).await {
                    match self.pool.min_wait_time_ms(&model).await {
                        Some(wait) if wait <= self.settings.max_wait_before_error_ms => {
                            tracing::info!(
                                "[{}] Every account cooling down for {}; sleeping {}ms",
                                trace_id,
                                model,
                                wait
                            );
                            sleep(Duration::from_millis(wait.max(0) as u64)).await;
                            continue;
                        }
                        Some(wait) => {
                            if allow_fallback && self.settings.fallback_enabled {
                                if let Some(fallback) =
                                    self.settings.fallback_models.get(&model).cloned()
                                {
                                    tracing::warn!(
                                        "[{}] Pool exhausted for {}, falling back to {}",
                                        trace_id,
                                        model,
                                        fallback
                                    );
                                    let mut fb_req = req.clone();
                                    fb_req.model = fallback;
                                    return self.dispatch(fb_req, streaming, false).await;
                                }
                            }
                            let reset_at = chrono::Utc::now()
                                + chrono::Duration::milliseconds(wait);
                            return Err(GatewayError::ResourceExhausted {
                                reset_hint: reset_at.to_rfc3339_opts(
                                    chrono::SecondsFormat::Secs,
                                    true,
                                ),
                            });
                        }
                        None => {
                            return Err(GatewayError::AuthInvalid(
                                "every configured account is invalid".to_string(),
                            ));
                        }
                    }
                }

                let access_token = match self.broker.token_for_account(&account).await {
                    Ok(token) => token,
                    Err(GatewayError::AuthNetwork(msg)) => {
                        tracing::warn!(
                            "[{}] Token refresh network failure for {}: {}",
                            trace_id,
                            account.email,
                            msg
                        );
                        last_error = msg;
                        sleep(TRANSIENT_BACKOFF).await;
                        self.pool.pick_next(&model).await;
                        continue;
                    }
                    Err(GatewayError::AuthInvalid(msg)) => {
                        // The broker already flagged the account; the next
                        // pick fails over.
                        last_error = msg;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let project_id = self.broker.project_for_account(&account, &access_token).await;

                let opts = TranslationOptions {
                    project_id: &project_id,
                    settings: &self.settings,
                    signatures: &self.signatures,
                };
                let body =
                    transform_claude_request(&req, &opts).map_err(GatewayError::Translation)?;

                // Thinking models only answer on the streaming endpoint.
                let force_stream = streaming || model_mapping::is_thinking_model(&model);
                let (method, query) = if force_stream {
                    (
                        endpoints::METHOD_STREAM_GENERATE_CONTENT,
                        Some(endpoints::STREAM_QUERY),
                    )
                } else {
                    (endpoints::METHOD_GENERATE_CONTENT, None)
                };

                match self
                    .try_endpoints(&trace_id, &account.email, &access_token, &body, method, query)
                    .await
                {
                    EndpointOutcome::Success(response) => {
                        match self
                            .handle_success(
                                &trace_id, &account.email, &model, response, streaming,
                                force_stream,
                            )
                            .await
                        {
                            Ok(reply) => return Ok(reply),
                            Err(retry_msg) => {
                                last_error = retry_msg;
                                continue;
                            }
                        }
                    }
                    EndpointOutcome::RateLimited { min_reset_ms, detail } => {
                        last_error = detail;
                        self.pool
                            .mark_rate_limited(&account.email, min_reset_ms, &model)
                            .await;
                        continue;
                    }
                    EndpointOutcome::Network(detail) => {
                        last_error = detail;
                        sleep(TRANSIENT_BACKOFF).await;
                        self.pool.pick_next(&model).await;
                        continue;
                    }
                    EndpointOutcome::SoftFailure(detail) => {
                        last_error = detail;
                        self.pool.pick_next(&model).await;
                        continue;
                    }
                    EndpointOutcome::Unauthorized(detail) => {
                        // Caches already invalidated; the retry refreshes.
                        last_error = detail;
                        continue;
                    }
                    EndpointOutcome::Fatal { status, message } => {
                        return Err(GatewayError::Upstream { status, message });
                    }
                }
            }

            Err(GatewayError::Upstream {
                status: 502,
                message: format!(
                    "all {} attempts failed, last error: {}",
                    max_attempts, last_error
                ),
            })
        })
    }

    async fn try_endpoints(
        &self,
        trace_id: &str,
        email: &str,
        access_token: &str,
        body: &Value,
        method: &str,
        query: Option<&str>,
    ) -> EndpointOutcome {
        let base_urls = self.upstream.base_urls().to_vec();
        let mut min_reset_ms: Option<i64> = None;
        let mut saw_429 = false;
        let mut saw_5xx = false;
        let mut last_detail = String::new();

        for (idx, base_url) in base_urls.iter().enumerate() {
            let has_next = idx + 1 < base_urls.len();
            let response = match self
                .upstream
                .post_endpoint(base_url, method, access_token, body, query)
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    return EndpointOutcome::Network(format!(
                        "request to {} failed: {}",
                        base_url, e
                    ));
                }
            };

            let status = response.status();
            if status.is_success() {
                return EndpointOutcome::Success(response);
            }

            let status_code = status.as_u16();
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string());
            let text = response.text().await.unwrap_or_default();
            last_detail = format!("HTTP {} from {}: {}", status_code, base_url, clip(&text));
            tracing::warn!("[{}] {}", trace_id, last_detail);

            match status_code {
                401 => {
                    self.broker.invalidate(email);
                    if has_next {
                        continue;
                    }
                    return EndpointOutcome::Unauthorized(last_detail);
                }
                429 => {
                    saw_429 = true;
                    if let Some(ms) =
                        rate_limit::parse_reset_hint_ms(&text, retry_after.as_deref())
                    {
                        min_reset_ms = Some(min_reset_ms.map_or(ms, |m| m.min(ms)));
                    }
                    if has_next {
                        continue;
                    }
                }
                500..=599 => {
                    saw_5xx = true;
                    if has_next {
                        sleep(TRANSIENT_BACKOFF).await;
                        continue;
                    }
                }
                _ => {
                    return EndpointOutcome::Fatal {
                        status: status_code,
                        message: clip(&text),
                    };
                }
            }
        }

        if saw_429 {
            EndpointOutcome::RateLimited {
                min_reset_ms,
                detail: last_detail,
            }
        } else if saw_5xx {
            EndpointOutcome::SoftFailure(last_detail)
        } else {
            EndpointOutcome::Network(last_detail)
        }
    }

    async fn handle_success(
        &self,
        trace_id: &str,
        email: &str,
        model: &str,
        response: reqwest::Response,
        client_wants_stream: bool,
        force_stream: bool,
    ) -> Result<Reply, String> {
        if !force_stream {
            let raw: Value = response
                .json()
                .await
                .map_err(|e| format!("failed to read upstream body: {}", e))?;
            let claude =
                crate::proxy::mappers::claude::transform_response(
                    &raw,
                    model,
                    &self.signatures,
                    &self.settings,
                );
            tracing::info!(
                "[{}] Request finished | Account: {} | In: {} | Out: {}",
                trace_id,
                email,
                claude.usage.input_tokens,
                claude.usage.output_tokens
            );
            return Ok(Reply::Json(claude));
        }

        let ctx = StreamContext {
            trace_id: trace_id.to_string(),
            email: email.to_string(),
            model: model.to_string(),
            signatures: Arc::clone(&self.signatures),
            min_signature_length: self.settings.min_signature_length,
        };
        let mut translated =
            create_anthropic_sse_stream(Box::pin(response.bytes_stream()), ctx);

        // Peek the first translated chunk so dead streams retry on another
        // account instead of reaching the client as an empty response.
        let first = match timeout(FIRST_CHUNK_TIMEOUT, translated.next()).await {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => return Err(format!("stream error during peek: {}", e)),
            Ok(None) => return Err("empty response stream".to_string()),
            Err(_) => return Err("timeout waiting for first stream data".to_string()),
        };

        let combined: SseStream =
            Box::pin(futures::stream::once(async move { Ok(first) }).chain(translated));

        if client_wants_stream {
            Ok(Reply::Stream(combined))
        } else {
            let collected = collect_stream_to_response(combined)
                .await
                .map_err(|e| format!("stream collection error: {}", e))?;
            Ok(Reply::Json(collected))
        }
    }
}

enum EndpointOutcome {
    Success(reqwest::Response),
    RateLimited {
        min_reset_ms: Option<i64>,
        detail: String,
    },
    Network(String),
    SoftFailure(String),
    Unauthorized(String),
    Fatal {
        status: u16,
        message: String,
    },
}

fn clip(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 300 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(300).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, AccountSource};
    use axum::{
        body::Body,
        http::{header, StatusCode},
        response::Response as AxumResponse,
        routing::post,
        Router,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn manual_account(email: &str) -> Account {
        let mut a = Account::new(email.to_string(), AccountSource::Manual);
        a.api_key = Some("sk-test".to_string());
        a.project_id = Some("proj-test".to_string());
        a
    }

    fn dispatcher_for(accounts: Vec<Account>, base_url: String) -> (Dispatcher, Arc<AccountPool>) {
        let settings = Settings::default();
        let pool = AccountPool::in_memory(accounts, settings.clone());
        let upstream = Arc::new(UpstreamClient::with_base_urls(vec![base_url]));
        let broker = Arc::new(CredentialBroker::new(
            pool.clone(),
            upstream.clone(),
            settings.clone(),
        ));
        let signatures = Arc::new(SignatureCache::with_defaults());
        (
            Dispatcher::new(pool.clone(), broker, upstream, signatures, settings),
            pool,
        )
    }

    fn request(model: &str) -> ClaudeRequest {
        serde_json::from_value(json!({
            "model": model,
            "max_tokens": 128,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1internal", addr)
    }

    fn gemini_json_body() -> serde_json::Value {
        json!({
            "response": {
                "candidates": [{
                    "content": {"parts": [{"text": "pong"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2},
                "responseId": "resp_ok",
                "modelVersion": "gemini-3-flash"
            }
        })
    }

    #[tokio::test]
    async fn non_streaming_request_succeeds() {
        let base = serve(Router::new().route(
            "/v1internal:generateContent",
            post(|| async { axum::Json(gemini_json_body()) }),
        ))
        .await;
        let (dispatcher, _) = dispatcher_for(vec![manual_account("a@test")], base);

        let resp = dispatcher.send(&request("gemini-3-flash")).await.unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.usage.input_tokens, 4);
    }

    #[tokio::test]
    async fn rate_limited_account_fails_over_to_next() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let base = serve(Router::new().route(
            "/v1internal:generateContent",
            post(move || {
                let n = hits2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        AxumResponse::builder()
                            .status(StatusCode::TOO_MANY_REQUESTS)
                            .header("Retry-After", "30")
                            .body(Body::from("{\"error\":{\"message\":\"quota\"}}"))
                            .unwrap()
                    } else {
                        AxumResponse::builder()
                            .header(header::CONTENT_TYPE, "application/json")
                            .body(Body::from(gemini_json_body().to_string()))
                            .unwrap()
                    }
                }
            }),
        ))
        .await;

        let (dispatcher, pool) = dispatcher_for(
            vec![manual_account("a@test"), manual_account("b@test")],
            base,
        );

        let resp = dispatcher.send(&request("gemini-3-flash")).await.unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert!(hits.load(Ordering::SeqCst) >= 2);
        // The first account carries the cooldown.
        assert!(pool.min_wait_time_ms("gemini-3-flash").await.is_some());
    }

    #[tokio::test]
    async fn long_cooldown_surfaces_resource_exhausted_without_sleeping() {
        let (dispatcher, pool) = dispatcher_for(
            vec![manual_account("only@test")],
            "http://127.0.0.1:9/v1internal".to_string(),
        );
        pool.mark_rate_limited("only@test", Some(600_000), "gemini-3-flash")
            .await;

        let started = std::time::Instant::now();
        let err = dispatcher
            .send(&request("gemini-3-flash"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ResourceExhausted { .. }));
        if let GatewayError::ResourceExhausted { reset_hint } = err {
            assert!(reset_hint.contains('T'));
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn fatal_4xx_surfaces_to_caller() {
        let base = serve(Router::new().route(
            "/v1internal:generateContent",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    "Invalid `signature` in thinking block",
                )
            }),
        ))
        .await;
        let (dispatcher, _) = dispatcher_for(vec![manual_account("a@test")], base);

        let err = dispatcher
            .send(&request("gemini-3-flash"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("signature"));
            }
            other => panic!("expected upstream error, got {:?}", other.to_string()),
        }
    }

    fn sse_body() -> String {
        let chunk1 = json!({
            "response": {
                "candidates": [{"content": {"parts": [{"text": "Hel"}]}}],
                "responseId": "resp_s",
                "modelVersion": "gemini-3-flash"
            }
        });
        let chunk2 = json!({
            "response": {
                "candidates": [{
                    "content": {"parts": [{"text": "lo"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}
            }
        });
        format!("data: {}\n\ndata: {}\n\n", chunk1, chunk2)
    }

    #[tokio::test]
    async fn streaming_request_yields_anthropic_sse() {
        let base = serve(Router::new().route(
            "/v1internal:streamGenerateContent",
            post(|| async {
                AxumResponse::builder()
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from(sse_body()))
                    .unwrap()
            }),
        ))
        .await;
        let (dispatcher, _) = dispatcher_for(vec![manual_account("a@test")], base);

        let mut req = request("gemini-3-flash");
        req.stream = true;
        let mut stream = dispatcher.send_stream(&req).await.unwrap();

        let mut all = String::new();
        while let Some(item) = stream.next().await {
            all.push_str(std::str::from_utf8(&item.unwrap()).unwrap());
        }
        assert!(all.contains("event: message_start"));
        assert!(all.contains("\"text\":\"Hel\""));
        assert!(all.contains("event: message_stop"));
    }

    #[tokio::test]
    async fn thinking_model_forces_sse_for_non_streaming_client() {
        let base = serve(Router::new().route(
            "/v1internal:streamGenerateContent",
            post(|| async {
                AxumResponse::builder()
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from(sse_body()))
                    .unwrap()
            }),
        ))
        .await;
        let (dispatcher, _) = dispatcher_for(vec![manual_account("a@test")], base);

        // Non-streaming client, thinking model: only the SSE route exists, so
        // success proves the dispatcher picked the streaming endpoint.
        let resp = dispatcher
            .send(&request("gemini-3-flash-thinking"))
            .await
            .unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        match &resp.content[0] {
            crate::proxy::mappers::claude::ContentBlock::Text { text } => {
                assert_eq!(text, "Hello")
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_pool_is_fatal() {
        let (dispatcher, _) =
            dispatcher_for(vec![], "http://127.0.0.1:9/v1internal".to_string());
        let err = dispatcher
            .send(&request("gemini-3-flash"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoAccounts));
    }
}
