use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants;

/// Recognized gateway settings. Every field has a documented default; unknown
/// fields in the persisted JSON are preserved verbatim through `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_duration_ms: i64,

    #[serde(default = "default_token_refresh_interval_ms")]
    pub token_refresh_interval_ms: i64,

    #[serde(default = "default_max_wait_before_error_ms")]
    pub max_wait_before_error_ms: i64,

    #[serde(default = "default_min_signature_length")]
    pub min_signature_length: usize,

    #[serde(default = "default_gemini_max_output_tokens")]
    pub gemini_max_output_tokens: i64,

    #[serde(default = "default_sentinel_signature")]
    pub sentinel_signature: String,

    #[serde(default = "default_endpoint_hosts")]
    pub endpoint_hosts: Vec<String>,

    #[serde(default = "default_project_id")]
    pub default_project_id: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default)]
    pub fallback_enabled: bool,

    /// Per-model fallback routes, consulted once per request when every
    /// account is cooling down for the original model.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fallback_models: HashMap<String, String>,

    /// Shared password for the inbound surface. `None` disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite file consulted when the pool file is absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_cooldown_ms() -> i64 {
    constants::DEFAULT_COOLDOWN_MS
}

fn default_token_refresh_interval_ms() -> i64 {
    constants::TOKEN_REFRESH_INTERVAL_MS
}

fn default_max_wait_before_error_ms() -> i64 {
    constants::MAX_WAIT_BEFORE_ERROR_MS
}

fn default_min_signature_length() -> usize {
    constants::MIN_SIGNATURE_LENGTH
}

fn default_gemini_max_output_tokens() -> i64 {
    constants::GEMINI_MAX_OUTPUT_TOKENS
}

fn default_sentinel_signature() -> String {
    constants::SENTINEL_SIGNATURE.to_string()
}

fn default_endpoint_hosts() -> Vec<String> {
    constants::CLOUDCODE_HOSTS
        .iter()
        .map(|h| (*h).to_string())
        .collect()
}

fn default_project_id() -> String {
    constants::DEFAULT_PROJECT_ID.to_string()
}

fn default_max_retries() -> usize {
    constants::DEFAULT_MAX_RETRIES
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_port() -> u16 {
    constants::DEFAULT_PORT
}

impl Settings {
    pub fn new() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("defaults are total")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
