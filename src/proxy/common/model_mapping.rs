// Model family detection and the OpenAI front-door alias table.
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const MODEL_CLAUDE_SONNET_45: &str = "claude-sonnet-4-5";
pub const MODEL_CLAUDE_SONNET_45_THINKING: &str = "claude-sonnet-4-5-thinking";
pub const MODEL_CLAUDE_OPUS_45: &str = "claude-opus-4-5";
pub const MODEL_CLAUDE_OPUS_45_THINKING: &str = "claude-opus-4-5-thinking";
pub const MODEL_CLAUDE_HAIKU_45: &str = "claude-haiku-4-5";
pub const MODEL_GEMINI_3_FLASH: &str = "gemini-3-flash";
pub const MODEL_GEMINI_3_FLASH_THINKING: &str = "gemini-3-flash-thinking";
pub const MODEL_GEMINI_3_PRO: &str = "gemini-3-pro";
pub const MODEL_GEMINI_3_PRO_HIGH: &str = "gemini-3-pro-high";

pub const FAMILY_CLAUDE: &str = "claude";
pub const FAMILY_GEMINI: &str = "gemini";

/// Catalog used for `/v1/models` when the upstream listing is unreachable.
pub const KNOWN_MODELS: &[&str] = &[
    MODEL_CLAUDE_SONNET_45,
    MODEL_CLAUDE_SONNET_45_THINKING,
    MODEL_CLAUDE_OPUS_45,
    MODEL_CLAUDE_OPUS_45_THINKING,
    MODEL_CLAUDE_HAIKU_45,
    MODEL_GEMINI_3_FLASH,
    MODEL_GEMINI_3_FLASH_THINKING,
    MODEL_GEMINI_3_PRO,
    MODEL_GEMINI_3_PRO_HIGH,
];

pub fn is_claude_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.starts_with("claude-") || lower == "claude"
}

pub fn is_gemini_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.starts_with("gemini-") || lower == "gemini"
}

/// "claude" or "gemini". Unknown ids route to the Gemini wire rules, which
/// is what the upstream does with them.
pub fn family_tag(model: &str) -> &'static str {
    if is_claude_model(model) {
        FAMILY_CLAUDE
    } else {
        FAMILY_GEMINI
    }
}

/// Thinking models always stream upstream, even for non-streaming clients.
pub fn is_thinking_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.contains("-thinking") || lower.starts_with("claude-opus-")
}

pub fn is_signature_family_compatible(cached_family: &str, target_model: &str) -> bool {
    cached_family == family_tag(target_model)
}

// Copilot-style short names observed from OpenAI-protocol clients.
static OPENAI_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("opus", MODEL_CLAUDE_OPUS_45);
    m.insert("opus-thinking", MODEL_CLAUDE_OPUS_45_THINKING);
    m.insert("sonnet", MODEL_CLAUDE_SONNET_45);
    m.insert("sonnet-proxy", MODEL_CLAUDE_SONNET_45);
    m.insert("sonnet-thinking", MODEL_CLAUDE_SONNET_45_THINKING);
    m.insert("haiku", MODEL_CLAUDE_HAIKU_45);
    m.insert("gemini", MODEL_GEMINI_3_FLASH);
    m.insert("gemini-thinking", MODEL_GEMINI_3_FLASH_THINKING);
    m.insert("gemini-pro", MODEL_GEMINI_3_PRO_HIGH);
    m.insert("gpt-4", MODEL_CLAUDE_SONNET_45);
    m.insert("gpt-4o", MODEL_CLAUDE_SONNET_45);
    m.insert("gpt-4o-mini", MODEL_CLAUDE_HAIKU_45);
    m.insert("o3-mini", MODEL_GEMINI_3_FLASH_THINKING);
    m
});

/// Maps an OpenAI-protocol model id to a real model id. Known Claude/Gemini
/// ids pass through; unknown ids fall back to the configured default.
pub fn resolve_openai_alias(model: &str, default_model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    if let Some(mapped) = OPENAI_ALIASES.get(lower.as_str()) {
        return (*mapped).to_string();
    }
    if is_claude_model(&lower) || is_gemini_model(&lower) {
        return model.to_string();
    }
    tracing::debug!(
        "[ModelMapping] Unknown model id '{}', falling back to {}",
        model,
        default_model
    );
    default_model.to_string()
}

/// Upstream tool names must match `[A-Za-z0-9_-]{1,64}`.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.truncate(64);
    if cleaned.is_empty() {
        cleaned.push_str("tool");
    }
    cleaned
}
