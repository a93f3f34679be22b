// Google streaming SSE → Anthropic streaming SSE.
//
// Single-pass state machine: at most one open content block at a time
// (thinking, text, or tool_use) plus a running block index. A captured
// thought signature is emitted as a signature_delta just before its thinking
// block closes.
use bytes::Bytes;
use futures::Stream;
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;

use super::models::*;
use crate::proxy::common::model_mapping;
use crate::proxy::SignatureCache;

pub struct StreamContext {
    pub trace_id: String,
    pub email: String,
    pub model: String,
    pub signatures: Arc<SignatureCache>,
    pub min_signature_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    None,
    Text,
    Thinking,
    ToolUse,
}

pub(super) struct StreamingState {
    block: BlockKind,
    index: usize,
    message_start_sent: bool,
    message_stop_sent: bool,
    used_tool: bool,
    pending_signature: Option<String>,
    emitted_any_block: bool,
    finish_reason: Option<String>,
    usage: Option<UsageMetadata>,
    model: String,
}

impl StreamingState {
    fn new(model: String) -> Self {
        Self {
            block: BlockKind::None,
            index: 0,
            message_start_sent: false,
            message_stop_sent: false,
            used_tool: false,
            pending_signature: None,
            emitted_any_block: false,
            finish_reason: None,
            usage: None,
            model,
        }
    }

    fn emit(&self, event: &str, data: Value) -> Bytes {
        Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            event,
            serde_json::to_string(&data).unwrap_or_default()
        ))
    }

    fn emit_delta(&self, delta: Value) -> Bytes {
        self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.index,
                "delta": delta,
            }),
        )
    }

    fn emit_message_start(&mut self, raw: &Value) -> Bytes {
        self.message_start_sent = true;
        let usage = raw
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok())
            .map(|u| to_claude_usage(&u))
            .unwrap_or_default();

        let message = json!({
            "id": raw.get("responseId").and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("msg_{}", crate::proxy::common::generate_random_id())),
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": raw.get("modelVersion").and_then(|v| v.as_str()).unwrap_or(&self.model),
            "stop_reason": null,
            "stop_sequence": null,
            "usage": usage,
        });

        self.emit(
            "message_start",
            json!({ "type": "message_start", "message": message }),
        )
    }

    fn start_block(&mut self, kind: BlockKind, content_block: Value) -> Vec<Bytes> {
        let mut chunks = self.end_block();
        chunks.push(self.emit(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.index,
                "content_block": content_block,
            }),
        ));
        self.block = kind;
        self.emitted_any_block = true;
        chunks
    }

    fn end_block(&mut self) -> Vec<Bytes> {
        if self.block == BlockKind::None {
            return vec![];
        }
        let mut chunks = Vec::new();

        if self.block == BlockKind::Thinking {
            if let Some(signature) = self.pending_signature.take() {
                chunks.push(self.emit_delta(json!({
                    "type": "signature_delta",
                    "signature": signature,
                })));
            }
        }

        chunks.push(self.emit(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": self.index }),
        ));
        self.index += 1;
        self.block = BlockKind::None;
        chunks
    }

    fn process_part(&mut self, part: &GeminiPart, ctx: &StreamContext) -> Vec<Bytes> {
        let mut chunks = Vec::new();

        let signature = part
            .thought_signature
            .as_ref()
            .filter(|sig| sig.len() >= ctx.min_signature_length)
            .cloned();
        if let Some(sig) = &signature {
            ctx.signatures
                .cache_signature_family(sig, model_mapping::family_tag(&ctx.model));
        }

        if let Some(fc) = &part.function_call {
            self.used_tool = true;
            let id = fc.id.clone().unwrap_or_else(|| {
                format!("toolu_{}", crate::proxy::common::generate_random_id())
            });
            if let Some(sig) = &signature {
                ctx.signatures.cache_tool_signature(&id, sig);
            }

            chunks.extend(self.start_block(
                BlockKind::ToolUse,
                json!({ "type": "tool_use", "id": id, "name": fc.name, "input": {} }),
            ));
            let args = fc.args.clone().unwrap_or_else(|| json!({}));
            let partial = serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
            chunks.push(self.emit_delta(json!({
                "type": "input_json_delta",
                "partial_json": partial,
            })));
            chunks.extend(self.end_block());
            return chunks;
        }

        if let Some(text) = &part.text {
            if part.thought.unwrap_or(false) {
                if self.block != BlockKind::Thinking {
                    chunks.extend(self.start_block(
                        BlockKind::Thinking,
                        json!({ "type": "thinking", "thinking": "" }),
                    ));
                }
                if !text.is_empty() {
                    chunks.push(self.emit_delta(json!({
                        "type": "thinking_delta",
                        "thinking": text,
                    })));
                }
                if signature.is_some() {
                    self.pending_signature = signature;
                }
            } else if !text.is_empty() {
                if self.block != BlockKind::Text {
                    chunks.extend(
                        self.start_block(BlockKind::Text, json!({ "type": "text", "text": "" })),
                    );
                }
                chunks.push(self.emit_delta(json!({
                    "type": "text_delta",
                    "text": text,
                })));
            }
        }

        chunks
    }

    fn finish(&mut self) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if self.message_stop_sent {
            return chunks;
        }

        if !self.message_start_sent {
            chunks.push(self.emit_message_start(&json!({})));
        }
        // A stream that produced no parts still yields a well-formed,
        // one-block empty-text response.
        if !self.emitted_any_block {
            chunks.extend(
                self.start_block(BlockKind::Text, json!({ "type": "text", "text": "" })),
            );
        }
        chunks.extend(self.end_block());

        let stop_reason = if self.used_tool {
            "tool_use"
        } else if self.finish_reason.as_deref() == Some("MAX_TOKENS") {
            "max_tokens"
        } else {
            "end_turn"
        };
        let usage = self
            .usage
            .as_ref()
            .map(to_claude_usage)
            .unwrap_or_default();

        chunks.push(self.emit(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": usage,
            }),
        ));
        chunks.push(Bytes::from(
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ));
        self.message_stop_sent = true;
        chunks
    }

    fn process_payload(&mut self, payload: &Value, ctx: &StreamContext) -> Vec<Bytes> {
        let raw = payload.get("response").unwrap_or(payload);
        let mut chunks = Vec::new();

        if !self.message_start_sent {
            chunks.push(self.emit_message_start(raw));
        }

        if let Some(parts) = raw
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part_value in parts {
                if let Ok(part) = serde_json::from_value::<GeminiPart>(part_value.clone()) {
                    chunks.extend(self.process_part(&part, ctx));
                }
            }
        }

        if let Some(reason) = raw
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|cand| cand.get("finishReason"))
            .and_then(|f| f.as_str())
        {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = raw
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok())
        {
            self.usage = Some(usage);
        }

        chunks
    }
}

/// Wraps an upstream Google SSE byte stream into an Anthropic SSE byte
/// stream. Events are yielded strictly in upstream order; dropping the
/// returned stream aborts the upstream call.
pub fn create_anthropic_sse_stream(
    mut upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    ctx: StreamContext,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    use async_stream::stream;
    use bytes::BytesMut;
    use futures::StreamExt;

    Box::pin(stream! {
        let mut state = StreamingState::new(ctx.model.clone());
        let mut buffer = BytesMut::new();

        while let Some(chunk_result) = upstream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        let Ok(line_str) = std::str::from_utf8(&line_raw) else { continue };
                        let line = line_str.trim();
                        let Some(data) = line.strip_prefix("data:") else { continue };
                        let data = data.trim();
                        if data.is_empty() || data == "[DONE]" {
                            continue;
                        }
                        let Ok(payload) = serde_json::from_str::<Value>(data) else {
                            tracing::debug!("[{}] Skipping unparseable SSE data line", ctx.trace_id);
                            continue;
                        };
                        for chunk in state.process_payload(&payload, &ctx) {
                            yield Ok(chunk);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("[{}] Upstream stream error: {}", ctx.trace_id, e);
                    yield Err(format!("upstream stream error: {}", e));
                    break;
                }
            }
        }

        if let Some(usage) = state.usage.as_ref() {
            tracing::info!(
                "[{}] Stream completed | Account: {} | In: {} | Out: {}",
                ctx.trace_id,
                ctx.email,
                usage.prompt_token_count.unwrap_or(0)
                    .saturating_sub(usage.cached_content_token_count.unwrap_or(0)),
                usage.candidates_token_count.unwrap_or(0),
            );
        }
        for chunk in state.finish() {
            yield Ok(chunk);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn ctx(signatures: Arc<SignatureCache>) -> StreamContext {
        StreamContext {
            trace_id: "trace1".to_string(),
            email: "a@test".to_string(),
            model: "gemini-3-flash-thinking".to_string(),
            signatures,
            min_signature_length: 50,
        }
    }

    fn google_chunk(parts: Value, finish: Option<&str>) -> Bytes {
        let mut body = json!({
            "candidates": [{ "content": { "parts": parts } }],
            "responseId": "resp_stream",
            "modelVersion": "gemini-3-flash-thinking"
        });
        if let Some(f) = finish {
            body["candidates"][0]["finishReason"] = json!(f);
            body["usageMetadata"] = json!({"promptTokenCount": 20, "candidatesTokenCount": 7});
        }
        Bytes::from(format!("data: {}\n\n", body))
    }

    async fn collect_events(chunks: Vec<Bytes>) -> Vec<(String, Value)> {
        let upstream = futures::stream::iter(
            chunks
                .into_iter()
                .map(Ok::<Bytes, reqwest::Error>)
                .collect::<Vec<_>>(),
        );
        let signatures = Arc::new(SignatureCache::with_defaults());
        let mut stream = create_anthropic_sse_stream(Box::pin(upstream), ctx(signatures));

        let mut parser = crate::proxy::mappers::sse::SseParser::new();
        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            let bytes = item.expect("stream should not error");
            events.extend(parser.push(std::str::from_utf8(&bytes).unwrap()));
        }
        events
    }

    #[tokio::test]
    async fn full_state_machine_scenario() {
        let sig = "s".repeat(64);
        let events = collect_events(vec![
            google_chunk(json!([{ "text": "t1", "thought": true }]), None),
            google_chunk(
                json!([{ "text": "t2", "thought": true, "thoughtSignature": sig }]),
                None,
            ),
            google_chunk(json!([{ "text": "A" }]), None),
            google_chunk(json!([{ "text": "B" }]), None),
            google_chunk(
                json!([{ "functionCall": { "name": "f", "args": { "k": 1 } } }]),
                Some("TOOL_USE"),
            ),
        ])
        .await;

        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta", // thinking t1
                "content_block_delta", // thinking t2
                "content_block_delta", // signature
                "content_block_stop",
                "content_block_start",
                "content_block_delta", // text A
                "content_block_delta", // text B
                "content_block_stop",
                "content_block_start",
                "content_block_delta", // input json
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // Blocks bracketed with strictly increasing indices from 0.
        assert_eq!(events[1].1["index"], 0);
        assert_eq!(events[1].1["content_block"]["type"], "thinking");
        assert_eq!(events[2].1["delta"]["thinking"], "t1");
        assert_eq!(events[4].1["delta"]["type"], "signature_delta");
        assert_eq!(events[4].1["delta"]["signature"], sig.as_str());
        assert_eq!(events[5].1["index"], 0);

        assert_eq!(events[6].1["index"], 1);
        assert_eq!(events[6].1["content_block"]["type"], "text");
        assert_eq!(events[7].1["delta"]["text"], "A");

        assert_eq!(events[10].1["index"], 2);
        assert_eq!(events[10].1["content_block"]["type"], "tool_use");
        assert!(events[10].1["content_block"]["id"]
            .as_str()
            .unwrap()
            .starts_with("toolu_"));
        assert_eq!(events[10].1["content_block"]["name"], "f");
        assert_eq!(events[11].1["delta"]["type"], "input_json_delta");
        assert_eq!(events[11].1["delta"]["partial_json"], "{\"k\":1}");

        assert_eq!(events[13].1["delta"]["stop_reason"], "tool_use");
        assert_eq!(events[13].1["usage"]["input_tokens"], 20);
        assert_eq!(events[13].1["usage"]["output_tokens"], 7);
    }

    #[tokio::test]
    async fn empty_stream_synthesizes_empty_text_block() {
        let events = collect_events(vec![]).await;
        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(events[1].1["content_block"]["type"], "text");
        assert_eq!(events[3].1["delta"]["stop_reason"], "end_turn");
    }

    #[tokio::test]
    async fn empty_text_parts_do_not_open_blocks() {
        let events = collect_events(vec![
            google_chunk(json!([{ "text": "" }]), None),
            google_chunk(json!([{ "text": "visible" }]), Some("STOP")),
        ])
        .await;
        let starts: Vec<&Value> = events
            .iter()
            .filter(|(n, _)| n == "content_block_start")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0]["content_block"]["type"], "text");
    }

    #[tokio::test]
    async fn tool_signature_is_cached_during_streaming() {
        let sig = "t".repeat(72);
        let upstream = futures::stream::iter(vec![Ok::<Bytes, reqwest::Error>(google_chunk(
            json!([{
                "functionCall": { "name": "f", "args": {}, "id": "tu_stream" },
                "thoughtSignature": sig
            }]),
            Some("TOOL_USE"),
        ))]);
        let signatures = Arc::new(SignatureCache::with_defaults());
        let mut stream =
            create_anthropic_sse_stream(Box::pin(upstream), ctx(signatures.clone()));
        while stream.next().await.is_some() {}

        assert_eq!(signatures.get_tool_signature("tu_stream"), Some(sig));
    }

    #[tokio::test]
    async fn max_tokens_maps_to_length_style_stop() {
        let events = collect_events(vec![google_chunk(
            json!([{ "text": "cut off" }]),
            Some("MAX_TOKENS"),
        )])
        .await;
        let delta = events
            .iter()
            .find(|(n, _)| n == "message_delta")
            .map(|(_, v)| v)
            .unwrap();
        assert_eq!(delta["delta"]["stop_reason"], "max_tokens");
    }
}
