pub const METHOD_LOAD_CODE_ASSIST: &str = "loadCodeAssist";
pub const METHOD_FETCH_AVAILABLE_MODELS: &str = "fetchAvailableModels";
pub const METHOD_GENERATE_CONTENT: &str = "generateContent";
pub const METHOD_STREAM_GENERATE_CONTENT: &str = "streamGenerateContent";

pub const STREAM_QUERY: &str = "alt=sse";

/// Base URLs for the `v1internal` API, in configured failover order.
pub fn v1_internal_base_urls(hosts: &[String]) -> Vec<String> {
    hosts
        .iter()
        .map(|host| format!("https://{}/v1internal", host))
        .collect()
}

/// Cloud Code methods use a colon separator: `…/v1internal:generateContent`.
pub fn build_url(base_url: &str, method: &str, query: Option<&str>) -> String {
    match query {
        Some(qs) if !qs.trim().is_empty() => format!("{}:{}?{}", base_url, method, qs),
        _ => format!("{}:{}", base_url, method),
    }
}
