// Google generateContent JSON → Anthropic Messages response.
//
// The upstream body is navigated defensively: a malformed response (missing
// candidates, parts that are not an array, unparseable parts) never fails
// translation, it just yields an empty-but-well-formed message.
use serde_json::Value;

use super::models::*;
use crate::models::Settings;
use crate::proxy::common::model_mapping;
use crate::proxy::SignatureCache;

struct ResponseBuilder<'a> {
    blocks: Vec<ContentBlock>,
    text_builder: String,
    thinking_builder: String,
    thinking_signature: Option<String>,
    has_tool_call: bool,
    model: &'a str,
    signatures: &'a SignatureCache,
    min_signature_length: usize,
}

impl<'a> ResponseBuilder<'a> {
    fn new(model: &'a str, signatures: &'a SignatureCache, min_signature_length: usize) -> Self {
        Self {
            blocks: Vec::new(),
            text_builder: String::new(),
            thinking_builder: String::new(),
            thinking_signature: None,
            has_tool_call: false,
            model,
            signatures,
            min_signature_length,
        }
    }

    fn process_part(&mut self, part: &GeminiPart) {
        let signature = part
            .thought_signature
            .as_ref()
            .filter(|sig| sig.len() >= self.min_signature_length)
            .cloned();

        if let Some(sig) = &signature {
            self.signatures
                .cache_signature_family(sig, model_mapping::family_tag(self.model));
        }

        if let Some(fc) = &part.function_call {
            self.flush_thinking();
            self.flush_text();
            self.has_tool_call = true;

            let id = fc.id.clone().unwrap_or_else(|| {
                format!("toolu_{}", crate::proxy::common::generate_random_id())
            });
            if let Some(sig) = &signature {
                self.signatures.cache_tool_signature(&id, sig);
            }

            self.blocks.push(ContentBlock::ToolUse {
                id,
                name: fc.name.clone(),
                input: fc.args.clone().unwrap_or_else(|| serde_json::json!({})),
                signature,
            });
            return;
        }

        if let Some(text) = &part.text {
            if part.thought.unwrap_or(false) {
                self.flush_text();
                self.thinking_builder.push_str(text);
                if signature.is_some() {
                    self.thinking_signature = signature;
                }
            } else if !text.is_empty() {
                self.flush_thinking();
                self.text_builder.push_str(text);
            }
        }
    }

    // Runs of adjacent thinking parts collapse into one block.
    fn flush_thinking(&mut self) {
        if self.thinking_builder.is_empty() && self.thinking_signature.is_none() {
            return;
        }
        self.blocks.push(ContentBlock::Thinking {
            thinking: std::mem::take(&mut self.thinking_builder),
            signature: self.thinking_signature.take(),
        });
    }

    // Runs of adjacent text parts collapse into one block.
    fn flush_text(&mut self) {
        if self.text_builder.is_empty() {
            return;
        }
        self.blocks.push(ContentBlock::Text {
            text: std::mem::take(&mut self.text_builder),
        });
    }

    fn finish(mut self, raw: &Value, requested_model: &str) -> ClaudeResponse {
        self.flush_thinking();
        self.flush_text();

        let finish_reason = raw
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("finishReason"))
            .and_then(|f| f.as_str());

        let stop_reason = if self.has_tool_call || finish_reason == Some("TOOL_USE") {
            Some("tool_use".to_string())
        } else {
            match finish_reason {
                Some("STOP") => Some("end_turn".to_string()),
                Some("MAX_TOKENS") => Some("max_tokens".to_string()),
                _ => None,
            }
        };

        let usage = raw
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok())
            .map(|u| to_claude_usage(&u))
            .unwrap_or_default();

        ClaudeResponse {
            id: raw
                .get("responseId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| {
                    format!("msg_{}", crate::proxy::common::generate_random_id())
                }),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: raw
                .get("modelVersion")
                .and_then(|v| v.as_str())
                .unwrap_or(requested_model)
                .to_string(),
            content: self.blocks,
            stop_reason,
            stop_sequence: None,
            usage,
        }
    }
}

pub fn transform_response(
    raw: &Value,
    requested_model: &str,
    signatures: &SignatureCache,
    settings: &Settings,
) -> ClaudeResponse {
    // Cloud Code wraps the generateContent body in a "response" envelope.
    let raw = raw.get("response").unwrap_or(raw);

    let mut builder = ResponseBuilder::new(
        requested_model,
        signatures,
        settings.min_signature_length,
    );

    if let Some(parts) = raw
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part_value in parts {
            if let Ok(part) = serde_json::from_value::<GeminiPart>(part_value.clone()) {
                builder.process_part(&part);
            }
        }
    }

    builder.finish(raw, requested_model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transform(raw: &Value) -> ClaudeResponse {
        let signatures = SignatureCache::with_defaults();
        transform_response(raw, "gemini-3-flash", &signatures, &Settings::default())
    }

    #[test]
    fn simple_text_response() {
        let raw = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello, "}, {"text": "world"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5},
            "modelVersion": "gemini-3-flash",
            "responseId": "resp_1"
        });
        let resp = transform(&raw);

        assert_eq!(resp.id, "resp_1");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.content.len(), 1);
        match &resp.content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "Hello, world"),
            other => panic!("expected text block, got {:?}", other),
        }
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 5);
    }

    #[test]
    fn thinking_and_tool_use_round_trip() {
        let sig = "z".repeat(80);
        let raw = json!({
            "response": {
                "candidates": [{
                    "content": {"parts": [
                        {"text": "reasoning…", "thought": true, "thoughtSignature": sig},
                        {"functionCall": {"name": "lookup", "args": {"q": "x"}, "id": "tu_1"}}
                    ]},
                    "finishReason": "TOOL_USE"
                }],
                "responseId": "resp_2"
            }
        });
        let signatures = SignatureCache::with_defaults();
        let resp = transform_response(&raw, "gemini-3-flash", &signatures, &Settings::default());

        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(resp.content.len(), 2);
        match &resp.content[0] {
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                assert_eq!(thinking, "reasoning…");
                assert_eq!(signature.as_deref(), Some(sig.as_str()));
            }
            other => panic!("expected thinking block, got {:?}", other),
        }
        match &resp.content[1] {
            ContentBlock::ToolUse { id, name, input, .. } => {
                assert_eq!(id, "tu_1");
                assert_eq!(name, "lookup");
                assert_eq!(input["q"], "x");
            }
            other => panic!("expected tool_use block, got {:?}", other),
        }
        // The signature is now recoverable by tool-use id, and its family is
        // recorded for cross-family checks.
        assert_eq!(signatures.get_tool_signature("tu_1"), None);
        assert_eq!(signatures.family_of(&sig).as_deref(), Some("gemini"));
    }

    #[test]
    fn function_call_without_id_gets_synthetic_id() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "f", "args": {}}}]}
            }]
        });
        let resp = transform(&raw);
        match &resp.content[0] {
            ContentBlock::ToolUse { id, .. } => assert!(id.starts_with("toolu_")),
            other => panic!("expected tool_use block, got {:?}", other),
        }
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn tool_signature_is_cached_by_id() {
        let sig = "q".repeat(90);
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "f", "args": {}, "id": "tu_sig"}, "thoughtSignature": sig}
                ]}
            }]
        });
        let signatures = SignatureCache::with_defaults();
        transform_response(&raw, "gemini-3-pro", &signatures, &Settings::default());
        assert_eq!(signatures.get_tool_signature("tu_sig"), Some(sig));
    }

    #[test]
    fn short_signature_is_not_carried() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking", "thought": true, "thoughtSignature": "short"}
                ]}
            }]
        });
        let resp = transform(&raw);
        match &resp.content[0] {
            ContentBlock::Thinking { signature, .. } => assert!(signature.is_none()),
            other => panic!("expected thinking block, got {:?}", other),
        }
    }

    #[test]
    fn malformed_bodies_yield_well_formed_empty_responses() {
        for raw in [
            json!({}),
            json!({"candidates": []}),
            json!({"candidates": [{"content": {"parts": "not-an-array"}}]}),
            json!({"candidates": [{"content": {}}]}),
            json!({"usageMetadata": {"promptTokenCount": -3}}),
        ] {
            let resp = transform(&raw);
            assert_eq!(resp.role, "assistant");
            assert_eq!(resp.type_, "message");
            assert!(resp.content.is_empty());
            assert!(resp.usage.input_tokens >= 0);
        }
    }

    #[test]
    fn max_tokens_finish_reason_maps() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"text": "partial"}]},
                "finishReason": "MAX_TOKENS"
            }]
        });
        assert_eq!(transform(&raw).stop_reason.as_deref(), Some("max_tokens"));
    }
}
