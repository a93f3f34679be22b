use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::time::Duration;

use crate::constants;
use crate::models::Settings;
use crate::proxy::google::endpoints;

/// Outbound HTTP client for the Cloud Code `v1internal` API with an ordered
/// list of fallback base URLs.
pub struct UpstreamClient {
    client: Client,
    base_urls: Vec<String>,
}

impl UpstreamClient {
    pub fn new(settings: &Settings) -> Self {
        Self::with_base_urls(endpoints::v1_internal_base_urls(&settings.endpoint_hosts))
    }

    pub fn with_base_urls(base_urls: Vec<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(600))
            .user_agent(constants::USER_AGENT.as_str())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, base_urls }
    }

    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    /// Shared reqwest client, reused for OAuth token calls.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// POST to a single endpoint. The dispatcher drives its own per-endpoint
    /// loop so it can react to 401/429/5xx per base URL.
    pub async fn post_endpoint(
        &self,
        base_url: &str,
        method: &str,
        access_token: &str,
        body: &Value,
        query: Option<&str>,
    ) -> Result<Response, reqwest::Error> {
        let url = endpoints::build_url(base_url, method, query);
        self.client
            .post(&url)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json")
            .header(
                "X-Goog-Api-Client",
                format!("{} {}", constants::IDE_TYPE, constants::USER_AGENT.as_str()),
            )
            .json(body)
            .send()
            .await
    }

    fn should_try_next_endpoint(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::NOT_FOUND
            || status.is_server_error()
    }

    /// Simple failover for auxiliary calls (`:loadCodeAssist`,
    /// `:fetchAvailableModels`): walk the endpoint list until one answers.
    pub async fn call_with_failover(
        &self,
        method: &str,
        access_token: &str,
        body: &Value,
        query: Option<&str>,
    ) -> Result<Response, String> {
        let mut last_err: Option<String> = None;

        for (idx, base_url) in self.base_urls.iter().enumerate() {
            let has_next = idx + 1 < self.base_urls.len();
            match self
                .post_endpoint(base_url, method, access_token, body, query)
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if idx > 0 {
                            tracing::info!(
                                "[Upstream] Fallback endpoint succeeded: {} ({})",
                                base_url,
                                status
                            );
                        }
                        return Ok(resp);
                    }
                    if has_next && Self::should_try_next_endpoint(status) {
                        tracing::warn!(
                            "[Upstream] {} returned {} for :{}, trying next endpoint",
                            base_url,
                            status,
                            method
                        );
                        last_err = Some(format!("{} returned {}", base_url, status));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    let msg = format!("request to {} failed: {}", base_url, e);
                    tracing::debug!("[Upstream] {}", msg);
                    last_err = Some(msg);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "all endpoints failed".to_string()))
    }
}
