// Collects an Anthropic SSE stream back into a complete ClaudeResponse.
// Used when a thinking model forces streaming for a non-streaming client.
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use super::models::*;
use crate::proxy::mappers::sse::SseParser;

pub async fn collect_stream_to_response<S>(mut stream: S) -> Result<ClaudeResponse, String>
where
    S: Stream<Item = Result<Bytes, String>> + Unpin,
{
    let mut parser = SseParser::new();
    let mut events = Vec::new();

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result?;
        let text = String::from_utf8_lossy(&chunk);
        events.extend(parser.push(&text));
    }
    if let Some(event) = parser.finish() {
        events.push(event);
    }

    let mut response = ClaudeResponse {
        id: format!("msg_{}", crate::proxy::common::generate_random_id()),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: String::new(),
        content: Vec::new(),
        stop_reason: None,
        stop_sequence: None,
        usage: Usage::default(),
    };

    let mut current_text = String::new();
    let mut current_thinking = String::new();
    let mut current_signature: Option<String> = None;
    let mut current_tool: Option<(String, String)> = None;
    let mut current_tool_input = String::new();
    let mut in_thinking = false;

    for (event, data) in events {
        match event.as_str() {
            "message_start" => {
                if let Some(message) = data.get("message") {
                    if let Some(id) = message.get("id").and_then(|v| v.as_str()) {
                        response.id = id.to_string();
                    }
                    if let Some(model) = message.get("model").and_then(|v| v.as_str()) {
                        response.model = model.to_string();
                    }
                    if let Some(usage) = message.get("usage") {
                        if let Ok(u) = serde_json::from_value::<Usage>(usage.clone()) {
                            response.usage = u;
                        }
                    }
                }
            }
            "content_block_start" => {
                if let Some(block) = data.get("content_block") {
                    match block.get("type").and_then(|v| v.as_str()) {
                        Some("text") => {
                            current_text.clear();
                            in_thinking = false;
                        }
                        Some("thinking") => {
                            current_thinking.clear();
                            current_signature = None;
                            in_thinking = true;
                        }
                        Some("tool_use") => {
                            let id = block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string();
                            let name = block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string();
                            current_tool = Some((id, name));
                            current_tool_input.clear();
                            in_thinking = false;
                        }
                        _ => {}
                    }
                }
            }
            "content_block_delta" => {
                if let Some(delta) = data.get("delta") {
                    match delta.get("type").and_then(|v| v.as_str()) {
                        Some("text_delta") => {
                            if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                                current_text.push_str(text);
                            }
                        }
                        Some("thinking_delta") => {
                            if let Some(thinking) =
                                delta.get("thinking").and_then(|v| v.as_str())
                            {
                                current_thinking.push_str(thinking);
                            }
                        }
                        Some("signature_delta") => {
                            if let Some(sig) = delta.get("signature").and_then(|v| v.as_str()) {
                                current_signature = Some(sig.to_string());
                            }
                        }
                        Some("input_json_delta") => {
                            if let Some(partial) =
                                delta.get("partial_json").and_then(|v| v.as_str())
                            {
                                current_tool_input.push_str(partial);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "content_block_stop" => {
                if let Some((id, name)) = current_tool.take() {
                    let input = if current_tool_input.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&current_tool_input).unwrap_or_else(|_| json!({}))
                    };
                    response.content.push(ContentBlock::ToolUse {
                        id,
                        name,
                        input,
                        signature: None,
                    });
                    current_tool_input.clear();
                } else if in_thinking {
                    response.content.push(ContentBlock::Thinking {
                        thinking: std::mem::take(&mut current_thinking),
                        signature: current_signature.take(),
                    });
                    in_thinking = false;
                } else if !current_text.is_empty() {
                    response.content.push(ContentBlock::Text {
                        text: std::mem::take(&mut current_text),
                    });
                }
            }
            "message_delta" => {
                if let Some(stop_reason) = data
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|v| v.as_str())
                {
                    response.stop_reason = Some(stop_reason.to_string());
                }
                if let Some(usage) = data.get("usage") {
                    if let Ok(u) = serde_json::from_value::<Usage>(usage.clone()) {
                        response.usage = u;
                    }
                }
            }
            "message_stop" => break,
            "error" => {
                let message = data
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown stream error");
                return Err(message.to_string());
            }
            _ => {}
        }
    }

    Ok(response)
}
