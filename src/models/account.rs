use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSource {
    /// OAuth account with a long-lived refresh token.
    Oauth,
    /// Statically configured API key, never refreshed.
    Manual,
    /// Credentials read from a local SQLite database.
    Database,
}

fn default_source() -> AccountSource {
    AccountSource::Oauth
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRateLimit {
    pub is_rate_limited: bool,
    /// Epoch milliseconds when the cooldown expires. An entry with
    /// `is_rate_limited = true` always carries a future reset time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,

    #[serde(default = "default_source")]
    pub source: AccountSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default)]
    pub added_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,

    #[serde(default)]
    pub is_invalid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<i64>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_rate_limits: HashMap<String, ModelRateLimit>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Account {
    pub fn new(email: String, source: AccountSource) -> Self {
        Self {
            email,
            source,
            refresh_token: None,
            api_key: None,
            project_id: None,
            added_at: chrono::Utc::now().timestamp_millis(),
            last_used: None,
            is_invalid: false,
            invalid_reason: None,
            invalid_at: None,
            model_rate_limits: HashMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Active (unexpired) rate limit for `model`, if any.
    pub fn active_limit(&self, model: &str, now_ms: i64) -> Option<&ModelRateLimit> {
        self.model_rate_limits.get(model).filter(|limit| {
            limit.is_rate_limited && limit.reset_time.map(|t| t > now_ms).unwrap_or(false)
        })
    }

    pub fn is_usable_for(&self, model: &str, now_ms: i64) -> bool {
        !self.is_invalid && self.active_limit(model, now_ms).is_none()
    }

    /// Milliseconds until this account's cooldown for `model` expires.
    pub fn wait_ms_for(&self, model: &str, now_ms: i64) -> Option<i64> {
        self.active_limit(model, now_ms)
            .and_then(|limit| limit.reset_time)
            .map(|t| t - now_ms)
    }

    pub fn set_rate_limited(&mut self, model: &str, reset_time_ms: i64) {
        self.model_rate_limits.insert(
            model.to_string(),
            ModelRateLimit {
                is_rate_limited: true,
                reset_time: Some(reset_time_ms),
            },
        );
    }

    pub fn set_invalid(&mut self, reason: &str) {
        self.is_invalid = true;
        self.invalid_reason = Some(reason.to_string());
        self.invalid_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Clears the invalid flag. Run on load so every account gets one fresh
    /// chance to refresh per process lifetime.
    pub fn reset_invalid(&mut self) {
        self.is_invalid = false;
        self.invalid_reason = None;
        self.invalid_at = None;
    }

    pub fn update_last_used(&mut self, now_ms: i64) {
        self.last_used = Some(now_ms);
    }

    /// Removes rate-limit entries whose reset time has passed.
    pub fn sweep_expired_limits(&mut self, now_ms: i64) {
        self.model_rate_limits.retain(|_, limit| {
            limit.is_rate_limited && limit.reset_time.map(|t| t > now_ms).unwrap_or(false)
        });
    }
}

/// On-disk shape of the whole pool. Rewritten atomically on mutation; fields
/// the gateway does not understand round-trip through `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoolFile {
    #[serde(default)]
    pub accounts: Vec<Account>,

    #[serde(default)]
    pub active_index: usize,

    #[serde(default)]
    pub settings: Settings,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
