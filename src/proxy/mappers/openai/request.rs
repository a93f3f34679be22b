// OpenAI Chat Completions → internal Anthropic request.
use serde_json::{json, Value};

use super::models::*;
use crate::models::Settings;
use crate::proxy::common::model_mapping;
use crate::proxy::mappers::claude::models as claude;

const DEFAULT_MAX_TOKENS: i64 = 8192;

pub fn to_claude_request(
    req: &OpenAIRequest,
    settings: &Settings,
) -> Result<claude::ClaudeRequest, String> {
    let model = model_mapping::resolve_openai_alias(&req.model, &settings.default_model);

    // System and developer messages concatenate into the Anthropic system
    // field.
    let system_text: String = req
        .messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "developer")
        .filter_map(|m| m.content.as_ref().map(content_to_text))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut messages: Vec<claude::Message> = Vec::new();
    for msg in &req.messages {
        match msg.role.as_str() {
            "system" | "developer" => continue,
            "tool" | "function" => {
                let tool_use_id = msg
                    .tool_call_id
                    .clone()
                    .ok_or_else(|| "tool message missing tool_call_id".to_string())?;
                let content = msg
                    .content
                    .as_ref()
                    .map(content_to_text)
                    .unwrap_or_default();
                messages.push(claude::Message {
                    role: "user".to_string(),
                    content: claude::MessageContent::Array(vec![
                        claude::ContentBlock::ToolResult {
                            tool_use_id,
                            content: Value::String(content),
                            is_error: None,
                        },
                    ]),
                });
            }
            "assistant" => {
                let mut blocks: Vec<claude::ContentBlock> = Vec::new();
                if let Some(content) = &msg.content {
                    let text = content_to_text(content);
                    if !text.is_empty() {
                        blocks.push(claude::ContentBlock::Text { text });
                    }
                }
                if let Some(tool_calls) = &msg.tool_calls {
                    for call in tool_calls {
                        let input: Value = serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(claude::ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input,
                            signature: None,
                        });
                    }
                }
                if blocks.is_empty() {
                    continue;
                }
                messages.push(claude::Message {
                    role: "assistant".to_string(),
                    content: claude::MessageContent::Array(blocks),
                });
            }
            _ => {
                let content = match &msg.content {
                    Some(OpenAIContent::String(s)) => {
                        claude::MessageContent::String(s.clone())
                    }
                    Some(OpenAIContent::Array(parts)) => {
                        claude::MessageContent::Array(user_blocks(parts))
                    }
                    None => continue,
                };
                messages.push(claude::Message {
                    role: "user".to_string(),
                    content,
                });
            }
        }
    }

    let tools = req.tools.as_ref().map(|list| {
        list.iter()
            .filter_map(|tool| {
                let function = tool.get("function").unwrap_or(tool);
                let name = function.get("name").and_then(|v| v.as_str())?;
                Some(claude::Tool {
                    name: name.to_string(),
                    description: function
                        .get("description")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    input_schema: function.get("parameters").cloned(),
                    type_: None,
                })
            })
            .collect::<Vec<_>>()
    });

    let stop_sequences = req.stop.as_ref().and_then(|stop| match stop {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(arr) => Some(
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
        ),
        _ => None,
    });

    Ok(claude::ClaudeRequest {
        model,
        messages,
        system: if system_text.is_empty() {
            None
        } else {
            Some(claude::SystemPrompt::String(system_text))
        },
        max_tokens: req
            .max_tokens
            .or(req.max_completion_tokens)
            .or(Some(DEFAULT_MAX_TOKENS)),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences,
        stream: req.stream,
        tools,
        tool_choice: req.tool_choice.clone(),
        thinking: None,
        metadata: None,
    })
}

fn content_to_text(content: &OpenAIContent) -> String {
    match content {
        OpenAIContent::String(s) => s.clone(),
        OpenAIContent::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                OpenAIContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn user_blocks(parts: &[OpenAIContentBlock]) -> Vec<claude::ContentBlock> {
    parts
        .iter()
        .filter_map(|part| match part {
            OpenAIContentBlock::Text { text } => {
                if text.is_empty() {
                    None
                } else {
                    Some(claude::ContentBlock::Text { text: text.clone() })
                }
            }
            OpenAIContentBlock::ImageUrl { image_url } => image_block(&image_url.url),
        })
        .collect()
}

// `data:` URLs unpack to inline base64; everything else passes as a URL
// reference.
fn image_block(url: &str) -> Option<claude::ContentBlock> {
    if let Some(rest) = url.strip_prefix("data:") {
        let comma = rest.find(',')?;
        let media_type = rest[..comma]
            .split(';')
            .next()
            .unwrap_or("image/jpeg")
            .to_string();
        let data = rest[comma + 1..].to_string();
        return Some(claude::ContentBlock::Image {
            source: claude::MediaSource::Base64 { media_type, data },
        });
    }
    Some(claude::ContentBlock::Image {
        source: claude::MediaSource::Url {
            url: url.to_string(),
            media_type: None,
        },
    })
}
