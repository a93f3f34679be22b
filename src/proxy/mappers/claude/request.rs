// Anthropic Messages → Google generateContent payload.
use serde_json::{json, Value};
use std::collections::HashMap;

use super::models::*;
use crate::models::Settings;
use crate::proxy::common::json_schema;
use crate::proxy::common::model_mapping;
use crate::proxy::SignatureCache;

const INTERLEAVED_THINKING_HINT: &str =
    "Interleaved thinking is enabled. You may think between tool calls and after tool results.";

pub struct TranslationOptions<'a> {
    pub project_id: &'a str,
    pub settings: &'a Settings,
    pub signatures: &'a SignatureCache,
}

struct BuildContext<'a> {
    model: &'a str,
    is_gemini: bool,
    thinking_enabled: bool,
    opts: &'a TranslationOptions<'a>,
}

pub fn transform_claude_request(
    req: &ClaudeRequest,
    opts: &TranslationOptions,
) -> Result<Value, String> {
    let family = model_mapping::family_tag(&req.model);
    let is_gemini = family == model_mapping::FAMILY_GEMINI;
    let thinking_enabled = model_mapping::is_thinking_model(&req.model)
        || req
            .thinking
            .as_ref()
            .map(|t| t.type_ == "enabled")
            .unwrap_or(false);

    let ctx = BuildContext {
        model: &req.model,
        is_gemini,
        thinking_enabled,
        opts,
    };

    let contents = build_contents(&req.messages, &ctx)?;
    let mut inner = json!({ "contents": contents });

    if let Some(system) = build_system_instruction(req, &ctx) {
        inner["systemInstruction"] = system;
    }

    let generation_config = build_generation_config(req, &ctx);
    if !generation_config
        .as_object()
        .map(|o| o.is_empty())
        .unwrap_or(true)
    {
        inner["generationConfig"] = generation_config;
    }

    if let Some(tools) = build_tools(&req.tools, &ctx) {
        inner["tools"] = tools;
    }

    Ok(json!({
        "project": ctx.opts.project_id,
        "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
        "request": inner,
        "model": req.model,
        "userAgent": "antigravity",
    }))
}

fn build_contents(messages: &[Message], ctx: &BuildContext<'_>) -> Result<Value, String> {
    let mut contents: Vec<Value> = Vec::new();
    let mut tool_id_to_name: HashMap<String, String> = HashMap::new();

    for msg in messages {
        let role = match msg.role.as_str() {
            "assistant" => "model",
            other => other,
        };
        let parts = build_parts(&msg.content, ctx, &mut tool_id_to_name)?;
        if parts.is_empty() {
            continue;
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    Ok(Value::Array(contents))
}

fn build_parts(
    content: &MessageContent,
    ctx: &BuildContext<'_>,
    tool_id_to_name: &mut HashMap<String, String>,
) -> Result<Vec<Value>, String> {
    let mut parts = Vec::new();

    match content {
        MessageContent::String(text) => {
            if !text.trim().is_empty() {
                parts.push(json!({ "text": text }));
            }
        }
        MessageContent::Array(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        if !text.trim().is_empty() {
                            parts.push(json!({ "text": text }));
                        }
                    }
                    ContentBlock::Image { source } | ContentBlock::Document { source } => {
                        parts.push(media_part(source));
                    }
                    ContentBlock::Thinking {
                        thinking,
                        signature,
                    } => {
                        if let Some(part) = thinking_part(thinking, signature, ctx) {
                            parts.push(part);
                        }
                    }
                    ContentBlock::ToolUse {
                        id,
                        name,
                        input,
                        signature,
                    } => {
                        let clean_name = model_mapping::sanitize_tool_name(name);
                        tool_id_to_name.insert(id.clone(), clean_name.clone());

                        let mut part = json!({
                            "functionCall": {
                                "name": clean_name,
                                "args": input,
                                "id": id,
                            }
                        });
                        if ctx.is_gemini {
                            part["thoughtSignature"] =
                                json!(resolve_tool_signature(id, signature, ctx));
                        }
                        parts.push(part);
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let name = tool_id_to_name
                            .get(tool_use_id)
                            .cloned()
                            .unwrap_or_else(|| tool_use_id.clone());
                        let (merged, images) =
                            tool_result_content(content, is_error.unwrap_or(false));

                        parts.push(json!({
                            "functionResponse": {
                                "name": name,
                                "response": { "result": merged },
                                "id": tool_use_id,
                            }
                        }));
                        // Embedded images ride along as sibling parts, in order.
                        parts.extend(images);
                    }
                }
            }
        }
    }

    Ok(parts)
}

fn media_part(source: &MediaSource) -> Value {
    match source {
        MediaSource::Base64 { media_type, data } => json!({
            "inlineData": { "mimeType": media_type, "data": data }
        }),
        MediaSource::Url { url, media_type } => json!({
            "fileData": {
                "fileUri": url,
                "mimeType": media_type.as_deref().unwrap_or("application/octet-stream"),
            }
        }),
    }
}

fn thinking_part(
    thinking: &str,
    signature: &Option<String>,
    ctx: &BuildContext<'_>,
) -> Option<Value> {
    let min_len = ctx.opts.settings.min_signature_length;
    let sig = match signature {
        Some(s) if s.len() >= min_len => s,
        _ => {
            tracing::debug!("[Claude-Request] Dropping thinking block without a usable signature");
            return None;
        }
    };

    if ctx.is_gemini {
        // Gemini rejects foreign signatures outright; unknown origin is
        // treated the same as cross-family.
        match ctx.opts.signatures.family_of(sig) {
            Some(family)
                if model_mapping::is_signature_family_compatible(&family, ctx.model) => {}
            Some(family) => {
                tracing::warn!(
                    "[Claude-Request] Dropping cross-family thinking block (origin: {}, target: {})",
                    family,
                    ctx.model
                );
                return None;
            }
            None => {
                tracing::debug!(
                    "[Claude-Request] Dropping thinking block with unknown signature origin for Gemini target"
                );
                return None;
            }
        }
    }

    Some(json!({
        "text": thinking,
        "thought": true,
        "thoughtSignature": sig,
    }))
}

/// Signature resolution for a follow-up tool_use: block field first, then the
/// cache keyed by tool-use id, then the sentinel Gemini accepts as "skip".
fn resolve_tool_signature(id: &str, signature: &Option<String>, ctx: &BuildContext<'_>) -> String {
    let min_len = ctx.opts.settings.min_signature_length;
    if let Some(sig) = signature {
        if sig.len() >= min_len {
            return sig.clone();
        }
    }
    if let Some(sig) = ctx.opts.signatures.get_tool_signature(id) {
        tracing::debug!(
            "[Claude-Request] Restored stripped signature for tool_use {} from cache",
            id
        );
        return sig;
    }
    ctx.opts.settings.sentinel_signature.clone()
}

/// Flattens tool_result content to the text the upstream expects; embedded
/// images come back as extra `inlineData` parts.
fn tool_result_content(content: &Value, is_error: bool) -> (String, Vec<Value>) {
    let mut images = Vec::new();
    let mut merged = match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    return Some(text.to_string());
                }
                if block.get("type").and_then(|v| v.as_str()) == Some("image") {
                    if let Some(source) = block.get("source") {
                        let mime = source
                            .get("media_type")
                            .and_then(|v| v.as_str())
                            .unwrap_or("image/png");
                        if let Some(data) = source.get("data").and_then(|v| v.as_str()) {
                            images.push(json!({
                                "inlineData": { "mimeType": mime, "data": data }
                            }));
                        }
                    }
                }
                None
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    if merged.trim().is_empty() {
        merged = if is_error {
            "Tool execution failed with no output.".to_string()
        } else {
            "Tool executed successfully.".to_string()
        };
    }
    (merged, images)
}

fn build_system_instruction(req: &ClaudeRequest, ctx: &BuildContext<'_>) -> Option<Value> {
    let mut text = String::new();

    match &req.system {
        Some(SystemPrompt::String(s)) => text.push_str(s),
        Some(SystemPrompt::Array(blocks)) => {
            for block in blocks {
                if block.block_type == "text" && !block.text.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&block.text);
                }
            }
        }
        None => {}
    }

    let claude_thinking_with_tools = !ctx.is_gemini
        && ctx.thinking_enabled
        && req.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false);
    if claude_thinking_with_tools {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(INTERLEAVED_THINKING_HINT);
    }

    if text.is_empty() {
        return None;
    }
    Some(json!({ "parts": [{ "text": text }] }))
}

fn build_generation_config(req: &ClaudeRequest, ctx: &BuildContext<'_>) -> Value {
    let mut config = json!({});

    if let Some(max_tokens) = req.max_tokens {
        let capped = if ctx.is_gemini {
            max_tokens.min(ctx.opts.settings.gemini_max_output_tokens)
        } else {
            max_tokens
        };
        config["maxOutputTokens"] = json!(capped);
    }
    if let Some(temp) = req.temperature {
        config["temperature"] = json!(temp);
    }
    if let Some(top_p) = req.top_p {
        config["topP"] = json!(top_p);
    }
    if let Some(stop) = &req.stop_sequences {
        if !stop.is_empty() {
            let truncated: Vec<&String> = stop.iter().take(4).collect();
            config["stopSequences"] = json!(truncated);
        }
    }

    if ctx.thinking_enabled {
        if ctx.is_gemini {
            let budget = req
                .thinking
                .as_ref()
                .and_then(|t| t.budget_tokens)
                .unwrap_or(16_000)
                .min(24_576);
            config["thinkingConfig"] = json!({
                "includeThoughts": true,
                "thinkingBudget": budget,
            });
        } else {
            config["thinkingConfig"] = json!({ "include_thoughts": true });
        }
    }

    config
}

fn build_tools(tools: &Option<Vec<Tool>>, ctx: &BuildContext<'_>) -> Option<Value> {
    let list = tools.as_ref()?;
    if list.is_empty() {
        return None;
    }

    let declarations: Vec<Value> = list
        .iter()
        .map(|tool| {
            let mut schema = tool.input_schema.clone().unwrap_or_else(|| {
                json!({ "type": "object", "properties": {} })
            });
            if ctx.is_gemini {
                json_schema::clean_json_schema_strict(&mut schema);
            } else {
                json_schema::clean_json_schema(&mut schema);
            }

            json!({
                "name": model_mapping::sanitize_tool_name(&tool.name),
                "description": tool.description.clone().unwrap_or_default(),
                "parameters": schema,
            })
        })
        .collect();

    Some(json!([{ "functionDeclarations": declarations }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    fn opts<'a>(settings: &'a Settings, signatures: &'a SignatureCache) -> TranslationOptions<'a> {
        TranslationOptions {
            project_id: "proj-1",
            settings,
            signatures,
        }
    }

    fn request(model: &str, messages: Vec<Message>) -> ClaudeRequest {
        ClaudeRequest {
            model: model.to_string(),
            messages,
            system: None,
            max_tokens: Some(1024),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: None,
        }
    }

    fn user_text(text: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: MessageContent::String(text.to_string()),
        }
    }

    #[test]
    fn roles_and_text_map_over() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let req = request(
            "gemini-3-flash",
            vec![
                user_text("hello"),
                Message {
                    role: "assistant".to_string(),
                    content: MessageContent::String("hi there".to_string()),
                },
            ],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();

        let contents = body["request"]["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "hello");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["project"], "proj-1");
        assert_eq!(body["model"], "gemini-3-flash");
    }

    #[test]
    fn empty_text_blocks_are_dropped() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let req = request(
            "gemini-3-flash",
            vec![Message {
                role: "user".to_string(),
                content: MessageContent::Array(vec![
                    ContentBlock::Text {
                        text: "".to_string(),
                    },
                    ContentBlock::Text {
                        text: "real".to_string(),
                    },
                ]),
            }],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let parts = body["request"]["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "real");
    }

    #[test]
    fn thinking_and_tool_use_for_gemini_target() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let sig = "g".repeat(80);
        sigs.cache_signature_family(&sig, "gemini");

        let req = request(
            "gemini-3-pro-high",
            vec![Message {
                role: "assistant".to_string(),
                content: MessageContent::Array(vec![
                    ContentBlock::Thinking {
                        thinking: "reasoning…".to_string(),
                        signature: Some(sig.clone()),
                    },
                    ContentBlock::ToolUse {
                        id: "tu_1".to_string(),
                        name: "lookup".to_string(),
                        input: json!({"q": "x"}),
                        signature: Some(sig.clone()),
                    },
                ]),
            }],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let parts = body["request"]["contents"][0]["parts"].as_array().unwrap();

        assert_eq!(parts[0]["text"], "reasoning…");
        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[0]["thoughtSignature"], sig.as_str());

        assert_eq!(parts[1]["functionCall"]["name"], "lookup");
        assert_eq!(parts[1]["functionCall"]["args"]["q"], "x");
        assert_eq!(parts[1]["functionCall"]["id"], "tu_1");
        assert_eq!(parts[1]["thoughtSignature"], sig.as_str());
    }

    #[test]
    fn cross_family_signature_is_dropped_for_gemini() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let claude_sig = "c".repeat(80);
        sigs.cache_signature_family(&claude_sig, "claude");

        let req = request(
            "gemini-3-flash-thinking",
            vec![Message {
                role: "assistant".to_string(),
                content: MessageContent::Array(vec![ContentBlock::Thinking {
                    thinking: "claude reasoning".to_string(),
                    signature: Some(claude_sig),
                }]),
            }],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        // The only block was dropped, so the whole message vanishes.
        assert!(body["request"]["contents"].as_array().unwrap().is_empty());
    }

    #[test]
    fn stripped_tool_signature_is_restored_from_cache_or_sentinel() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let cached = "s".repeat(70);
        sigs.cache_tool_signature("tu_cached", &cached);

        let req = request(
            "gemini-3-flash",
            vec![Message {
                role: "assistant".to_string(),
                content: MessageContent::Array(vec![
                    ContentBlock::ToolUse {
                        id: "tu_cached".to_string(),
                        name: "a".to_string(),
                        input: json!({}),
                        signature: None,
                    },
                    ContentBlock::ToolUse {
                        id: "tu_unknown".to_string(),
                        name: "b".to_string(),
                        input: json!({}),
                        signature: None,
                    },
                ]),
            }],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let parts = body["request"]["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["thoughtSignature"], cached.as_str());
        assert_eq!(
            parts[1]["thoughtSignature"],
            crate::constants::SENTINEL_SIGNATURE
        );
    }

    #[test]
    fn claude_target_keeps_ids_and_skips_sentinel() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let req = request(
            "claude-sonnet-4-5",
            vec![Message {
                role: "assistant".to_string(),
                content: MessageContent::Array(vec![ContentBlock::ToolUse {
                    id: "toolu_9".to_string(),
                    name: "run".to_string(),
                    input: json!({"cmd": "ls"}),
                    signature: None,
                }]),
            }],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let part = &body["request"]["contents"][0]["parts"][0];
        assert_eq!(part["functionCall"]["id"], "toolu_9");
        assert!(part.get("thoughtSignature").is_none());
    }

    #[test]
    fn tool_result_maps_to_function_response_with_images() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let req = request(
            "gemini-3-flash",
            vec![
                Message {
                    role: "assistant".to_string(),
                    content: MessageContent::Array(vec![ContentBlock::ToolUse {
                        id: "tu_img".to_string(),
                        name: "screenshot".to_string(),
                        input: json!({}),
                        signature: None,
                    }]),
                },
                Message {
                    role: "user".to_string(),
                    content: MessageContent::Array(vec![ContentBlock::ToolResult {
                        tool_use_id: "tu_img".to_string(),
                        content: json!([
                            {"type": "text", "text": "here it is"},
                            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
                        ]),
                        is_error: None,
                    }]),
                },
            ],
        );
        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let parts = body["request"]["contents"][1]["parts"].as_array().unwrap();

        assert_eq!(parts[0]["functionResponse"]["name"], "screenshot");
        assert_eq!(parts[0]["functionResponse"]["id"], "tu_img");
        assert_eq!(parts[0]["functionResponse"]["response"]["result"], "here it is");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AAAA");
    }

    #[test]
    fn generation_config_caps_gemini_output_and_truncates_stops() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let mut req = request("gemini-3-flash", vec![user_text("hi")]);
        req.max_tokens = Some(1_000_000);
        req.temperature = Some(0.7);
        req.top_p = Some(0.9);
        req.stop_sequences = Some(vec![
            "a".into(),
            "b".into(),
            "c".into(),
            "d".into(),
            "e".into(),
        ]);

        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let config = &body["request"]["generationConfig"];
        assert_eq!(config["maxOutputTokens"], 65_536);
        assert_eq!(config["temperature"], 0.7);
        assert_eq!(config["topP"], 0.9);
        assert_eq!(config["stopSequences"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn thinking_config_uses_family_specific_field_names() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();

        let gemini = request("gemini-3-flash-thinking", vec![user_text("hi")]);
        let body = transform_claude_request(&gemini, &opts(&s, &sigs)).unwrap();
        let tc = &body["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(tc["includeThoughts"], true);
        assert_eq!(tc["thinkingBudget"], 16_000);

        let claude = request("claude-sonnet-4-5-thinking", vec![user_text("hi")]);
        let body = transform_claude_request(&claude, &opts(&s, &sigs)).unwrap();
        let tc = &body["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(tc["include_thoughts"], true);
        assert!(tc.get("thinkingBudget").is_none());
    }

    #[test]
    fn system_prompt_lands_in_system_instruction() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let mut req = request("claude-sonnet-4-5-thinking", vec![user_text("hi")]);
        req.system = Some(SystemPrompt::String("You are terse.".to_string()));
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            input_schema: None,
            type_: None,
        }]);

        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let text = body["request"]["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(text.starts_with("You are terse."));
        assert!(text.contains("Interleaved thinking is enabled"));
    }

    #[test]
    fn tools_are_sanitized_declarations() {
        let s = settings();
        let sigs = SignatureCache::with_defaults();
        let mut req = request("gemini-3-flash", vec![user_text("hi")]);
        req.tools = Some(vec![Tool {
            name: "mcp__files.read!".to_string(),
            description: Some("read a file".to_string()),
            input_schema: Some(json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "properties": {"path": {"type": "string", "minLength": 1}}
            })),
            type_: None,
        }]);

        let body = transform_claude_request(&req, &opts(&s, &sigs)).unwrap();
        let decl = &body["request"]["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "mcp__files_read_");
        assert!(decl["parameters"].get("$schema").is_none());
        assert!(decl["parameters"]["properties"]["path"]
            .get("minLength")
            .is_none());
    }
}
