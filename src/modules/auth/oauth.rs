use serde::{Deserialize, Serialize};
use std::path::Path;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

fn env_first(keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Ok(v) = std::env::var(k) {
            let t = v.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
    }
    None
}

fn client_id() -> Option<String> {
    env_first(&["PONTIS_GOOGLE_OAUTH_CLIENT_ID", "GOOGLE_OAUTH_CLIENT_ID"])
}

fn client_secret_optional() -> Option<String> {
    env_first(&[
        "PONTIS_GOOGLE_OAUTH_CLIENT_SECRET",
        "GOOGLE_OAUTH_CLIENT_SECRET",
    ])
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
}

/// Token refresh failures fall into exactly two buckets. Network failures
/// never invalidate an account; permanent failures always do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// DNS failure, connection refused/reset, timeout, or a 5xx from the
    /// token endpoint.
    Network(String),
    /// 4xx from the token endpoint, malformed response, or a response
    /// missing `access_token`.
    Permanent(String),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::Network(msg) => write!(f, "network error: {}", msg),
            RefreshError::Permanent(msg) => write!(f, "permanent error: {}", msg),
        }
    }
}

pub async fn refresh_access_token(
    client: &reqwest::Client,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshError> {
    refresh_access_token_at(client, TOKEN_URL, refresh_token).await
}

pub async fn refresh_access_token_at(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshError> {
    let cid = match client_id() {
        Some(c) => c,
        None => {
            // Local misconfiguration, not an account problem.
            tracing::warn!("[OAuth] Missing Google OAuth client id; set PONTIS_GOOGLE_OAUTH_CLIENT_ID");
            return Err(RefreshError::Network(
                "missing OAuth client id configuration".to_string(),
            ));
        }
    };

    let mut params: Vec<(&str, String)> = vec![
        ("client_id", cid),
        ("refresh_token", refresh_token.to_string()),
        ("grant_type", "refresh_token".to_string()),
    ];
    if let Some(secret) = client_secret_optional() {
        params.push(("client_secret", secret));
    }

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| RefreshError::Network(format!("token request failed: {}", e)))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(RefreshError::Network(format!(
            "token endpoint returned {}",
            status
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RefreshError::Permanent(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::Permanent(format!("malformed token response: {}", e)))?;

    if token.access_token.is_empty() {
        return Err(RefreshError::Permanent(
            "token response missing access_token".to_string(),
        ));
    }

    tracing::debug!(
        "[OAuth] Token refreshed, expires in {} seconds",
        token.expires_in
    );
    Ok(token)
}

/// Single-credential fallback read from a local SQLite database. Returns
/// `(email, refresh_token)` when present.
pub fn read_database_credentials(path: &Path) -> rusqlite::Result<Option<(String, String)>> {
    let conn = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?;
    let mut stmt = conn.prepare("SELECT email, refresh_token FROM credentials LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
        None => Ok(None),
    }
}
