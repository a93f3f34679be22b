// Internal Anthropic response → OpenAI Chat Completions response.
use super::models::*;
use crate::proxy::mappers::claude::models as claude;

pub fn to_openai_response(resp: &claude::ClaudeResponse, requested_model: &str) -> OpenAIResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &resp.content {
        match block {
            claude::ContentBlock::Text { text: t } => text.push_str(t),
            claude::ContentBlock::ToolUse { id, name, input, .. } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    type_: "function".to_string(),
                    function: ToolFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = map_stop_reason(resp.stop_reason.as_deref(), !tool_calls.is_empty());

    let message = OpenAIMessage {
        role: "assistant".to_string(),
        content: if text.is_empty() {
            None
        } else {
            Some(OpenAIContent::String(text))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
        name: None,
    };

    let prompt_tokens = resp.usage.input_tokens;
    let completion_tokens = resp.usage.output_tokens;

    OpenAIResponse {
        id: format!("chatcmpl-{}", resp.id.trim_start_matches("msg_")),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: requested_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: OpenAIUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}

pub fn map_stop_reason(stop_reason: Option<&str>, has_tool_calls: bool) -> &'static str {
    if has_tool_calls || stop_reason == Some("tool_use") {
        "tool_calls"
    } else if stop_reason == Some("max_tokens") {
        "length"
    } else {
        "stop"
    }
}
