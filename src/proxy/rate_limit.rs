use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d+)h)?(?:(\d+)m)?(?:(\d+(?:\.\d+)?)s)?(?:(\d+(?:\.\d+)?)ms)?")
        .expect("duration regex")
});

static BODY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)try again in (\d+)m\s*(\d+)s").unwrap(),
        Regex::new(r"(?i)(?:try again in|backoff for|wait)\s*(\d+)s").unwrap(),
        Regex::new(r"(?i)quota will reset in (\d+) second").unwrap(),
        Regex::new(r"(?i)retry after (\d+) second").unwrap(),
    ]
});

/// Parses a Go-style duration string ("32s", "2h1m5s", "510.7ms") into
/// milliseconds. Fractional seconds are rounded up.
fn parse_duration_ms(s: &str) -> Option<i64> {
    let caps = DURATION_RE.captures(s)?;

    let hours: i64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let minutes: i64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let seconds: f64 = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let millis: f64 = caps
        .get(4)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);

    let total =
        hours * 3_600_000 + minutes * 60_000 + (seconds * 1000.0).ceil() as i64 + millis.ceil() as i64;
    if total == 0 {
        None
    } else {
        Some(total)
    }
}

/// Walks `error.details[*]` looking for a `retryInfo`-shaped entry carrying
/// `retryDelay`.
fn retry_delay_from_json(body: &str) -> Option<i64> {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let details = json.get("error")?.get("details")?.as_array()?;

    for detail in details {
        let delay = detail
            .get("retryInfo")
            .and_then(|ri| ri.get("retryDelay"))
            .or_else(|| detail.get("retryDelay"))
            .or_else(|| detail.get("metadata").and_then(|m| m.get("quotaResetDelay")));
        if let Some(delay_str) = delay.and_then(|v| v.as_str()) {
            tracing::debug!("[RateLimit] Found structured retry delay: '{}'", delay_str);
            if let Some(ms) = parse_duration_ms(delay_str) {
                return Some(ms);
            }
        }
    }
    None
}

fn retry_delay_from_body_text(body: &str) -> Option<i64> {
    for (idx, re) in BODY_PATTERNS.iter().enumerate() {
        if let Some(caps) = re.captures(body) {
            let ms = if idx == 0 {
                let m: i64 = caps[1].parse().ok()?;
                let s: i64 = caps[2].parse().ok()?;
                (m * 60 + s) * 1000
            } else {
                let s: i64 = caps[1].parse().ok()?;
                s * 1000
            };
            return Some(ms);
        }
    }
    None
}

/// Extracts a cooldown duration from a 429 response, in milliseconds.
///
/// Priority: structured `retryInfo.retryDelay` in the JSON body, then a
/// `Retry-After` header in seconds, then a pattern search over the body.
/// Returns `None` when nothing parses; the caller applies the configured
/// default cooldown.
pub fn parse_reset_hint_ms(body: &str, retry_after_header: Option<&str>) -> Option<i64> {
    if let Some(ms) = retry_delay_from_json(body) {
        return Some(ms);
    }

    if let Some(header) = retry_after_header {
        if let Ok(seconds) = header.trim().parse::<i64>() {
            if seconds > 0 {
                return Some(seconds * 1000);
            }
        }
    }

    retry_delay_from_body_text(body)
}
