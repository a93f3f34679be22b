pub mod errors;
pub mod messages;
pub mod models;
pub mod openai;
pub mod streaming;

use axum::http::HeaderMap;

use crate::models::Settings;

/// Shared-password check. With no configured key every request passes; with
/// one, either header form is accepted.
pub fn authorized(settings: &Settings, headers: &HeaderMap) -> bool {
    let expected = match &settings.api_key {
        Some(key) if !key.is_empty() => key,
        _ => return true,
    };

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer == Some(expected.as_str()) {
        return true;
    }

    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn no_key_means_open() {
        let settings = Settings::default();
        assert!(authorized(&settings, &HeaderMap::new()));
    }

    #[test]
    fn bearer_and_x_api_key_both_accepted() {
        let mut settings = Settings::default();
        settings.api_key = Some("secret".to_string());

        assert!(!authorized(&settings, &HeaderMap::new()));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(authorized(&settings, &headers));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        assert!(authorized(&settings, &headers));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("wrong"));
        assert!(!authorized(&settings, &headers));
    }
}
