use std::path::{Path, PathBuf};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{Account, AccountSource, PoolFile};

pub fn default_pool_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pontis")
        .join("accounts.json")
}

pub fn default_database_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pontis")
        .join("auth.db")
}

pub fn load_pool_file(path: &Path) -> GatewayResult<Option<PoolFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let file: PoolFile = serde_json::from_str(&content).map_err(|e| {
        GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to parse {}: {}", path.display(), e),
        ))
    })?;
    Ok(Some(file))
}

/// Atomic rewrite: serialize to a sibling temp file, then rename over the
/// target.
pub fn save_pool_file(path: &Path, file: &PoolFile) -> GatewayResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(file).map_err(|e| {
        GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to serialize pool state: {}", e),
        ))
    })?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Single-account fallback used when the pool file is missing or empty.
pub fn load_database_account(path: &Path) -> Option<Account> {
    if !path.exists() {
        return None;
    }
    match crate::modules::auth::oauth::read_database_credentials(path) {
        Ok(Some((email, refresh_token))) => {
            tracing::info!(
                "[Pool] Loaded single-account fallback from database: {}",
                email
            );
            let mut account = Account::new(email, AccountSource::Database);
            account.refresh_token = Some(refresh_token);
            Some(account)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("[Pool] Database fallback read failed: {}", e);
            None
        }
    }
}
