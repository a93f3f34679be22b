// Credential broker: short-lived access tokens and Cloud Code project ids
// per account, with process-lifetime caches.
use dashmap::DashMap;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use crate::constants;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{Account, AccountSource, Settings};
use crate::modules::auth::oauth::{self, RefreshError};
use crate::proxy::google::endpoints;
use crate::proxy::pool::{persistence, AccountPool};
use crate::proxy::upstream::UpstreamClient;

struct TokenCacheEntry {
    access_token: String,
    fetched_at_ms: i64,
}

pub struct CredentialBroker {
    pool: Arc<AccountPool>,
    upstream: Arc<UpstreamClient>,
    tokens: DashMap<String, TokenCacheEntry>,
    projects: DashMap<String, String>,
    settings: Settings,
    token_url: Option<String>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl CredentialBroker {
    pub fn new(pool: Arc<AccountPool>, upstream: Arc<UpstreamClient>, settings: Settings) -> Self {
        Self {
            pool,
            upstream,
            tokens: DashMap::new(),
            projects: DashMap::new(),
            settings,
            token_url: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_token_url(mut self, url: String) -> Self {
        self.token_url = Some(url);
        self
    }

    /// Returns a valid access token for the account, refreshing if the cached
    /// one is older than the refresh interval.
    pub async fn token_for_account(&self, account: &Account) -> GatewayResult<String> {
        if let Some(entry) = self.tokens.get(&account.email) {
            if now_ms() - entry.fetched_at_ms < self.settings.token_refresh_interval_ms {
                return Ok(entry.access_token.clone());
            }
        }

        let token = match account.source {
            AccountSource::Manual => match &account.api_key {
                Some(key) => key.clone(),
                None => {
                    let reason = "manual account has no API key";
                    self.pool.mark_invalid(&account.email, reason).await;
                    return Err(GatewayError::AuthInvalid(reason.to_string()));
                }
            },
            AccountSource::Oauth | AccountSource::Database => {
                let refresh_token = match self.resolve_refresh_token(account) {
                    Some(rt) => rt,
                    None => {
                        let reason = "account has no refresh token";
                        self.pool.mark_invalid(&account.email, reason).await;
                        return Err(GatewayError::AuthInvalid(reason.to_string()));
                    }
                };
                self.exchange_refresh_token(&account.email, &refresh_token)
                    .await?
            }
        };

        self.tokens.insert(
            account.email.clone(),
            TokenCacheEntry {
                access_token: token.clone(),
                fetched_at_ms: now_ms(),
            },
        );
        Ok(token)
    }

    fn resolve_refresh_token(&self, account: &Account) -> Option<String> {
        if let Some(rt) = &account.refresh_token {
            return Some(rt.clone());
        }
        if account.source == AccountSource::Database {
            let db_path = self
                .settings
                .database_path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(persistence::default_database_path);
            if let Ok(Some((_, rt))) = oauth::read_database_credentials(&db_path) {
                return Some(rt);
            }
        }
        None
    }

    async fn exchange_refresh_token(
        &self,
        email: &str,
        refresh_token: &str,
    ) -> GatewayResult<String> {
        let result = match &self.token_url {
            Some(url) => {
                oauth::refresh_access_token_at(self.upstream.http(), url, refresh_token).await
            }
            None => oauth::refresh_access_token(self.upstream.http(), refresh_token).await,
        };

        match result {
            Ok(token) => Ok(token.access_token),
            Err(RefreshError::Network(msg)) => {
                tracing::warn!(
                    "[Broker] Transient token refresh failure for {}: {}",
                    email,
                    msg
                );
                Err(GatewayError::AuthNetwork(msg))
            }
            Err(RefreshError::Permanent(msg)) => {
                self.pool.mark_invalid(email, &msg).await;
                Err(GatewayError::AuthInvalid(msg))
            }
        }
    }

    /// Resolves the Cloud AI Companion project for an account. Pre-assigned
    /// ids win; otherwise `:loadCodeAssist` is asked over the endpoint list.
    /// Total failure degrades to the configured default project.
    pub async fn project_for_account(&self, account: &Account, access_token: &str) -> String {
        if let Some(project) = self.projects.get(&account.email) {
            return project.clone();
        }

        if let Some(project) = &account.project_id {
            self.projects
                .insert(account.email.clone(), project.clone());
            return project.clone();
        }

        let body = json!({
            "metadata": {
                "ideType": constants::IDE_TYPE,
                "platform": std::env::consts::OS.to_uppercase(),
                "pluginType": constants::PLUGIN_TYPE,
            }
        });

        match self
            .upstream
            .call_with_failover(endpoints::METHOD_LOAD_CODE_ASSIST, access_token, &body, None)
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(data) = resp.json::<serde_json::Value>().await {
                    if let Some(project) = extract_project_id(&data) {
                        tracing::info!(
                            "[Broker] Discovered project {} for {}",
                            project,
                            account.email
                        );
                        self.projects.insert(account.email.clone(), project.clone());
                        return project;
                    }
                }
            }
            Ok(resp) => {
                tracing::warn!(
                    "[Broker] loadCodeAssist returned {} for {}",
                    resp.status(),
                    account.email
                );
            }
            Err(e) => {
                tracing::warn!("[Broker] loadCodeAssist failed for {}: {}", account.email, e);
            }
        }

        tracing::warn!(
            "[Broker] Falling back to default project id for {}",
            account.email
        );
        self.settings.default_project_id.clone()
    }

    /// Drops cached credentials for an account. The dispatcher calls this
    /// when the upstream answers 401.
    pub fn invalidate(&self, email: &str) {
        self.tokens.remove(email);
        self.projects.remove(email);
        tracing::debug!("[Broker] Invalidated cached credentials for {}", email);
    }
}

fn extract_project_id(data: &serde_json::Value) -> Option<String> {
    let field = data.get("cloudaicompanionProject")?;
    if let Some(s) = field.as_str() {
        if !s.is_empty() {
            return Some(s.to_string());
        }
        return None;
    }
    field
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
