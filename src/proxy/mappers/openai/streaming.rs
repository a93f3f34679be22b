// Reshapes an Anthropic SSE stream into OpenAI Chat Completions chunks,
// terminated by `data: [DONE]`.
use bytes::Bytes;
use futures::Stream;
use serde_json::{json, Value};
use std::pin::Pin;

use super::response::map_stop_reason;
use crate::proxy::mappers::sse::SseParser;

struct ChunkState {
    id: String,
    created: i64,
    model: String,
    role_sent: bool,
    tool_index: i64,
    in_tool_block: bool,
    saw_tool_call: bool,
}

impl ChunkState {
    fn new(model: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", crate::proxy::common::generate_random_id()),
            created: chrono::Utc::now().timestamp(),
            model,
            role_sent: false,
            tool_index: -1,
            in_tool_block: false,
            saw_tool_call: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Bytes {
        let body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        Bytes::from(format!("data: {}\n\n", body))
    }

    fn handle_event(&mut self, event: &str, data: &Value) -> Vec<Bytes> {
        let mut out = Vec::new();

        match event {
            "message_start" => {
                if !self.role_sent {
                    self.role_sent = true;
                    out.push(self.chunk(json!({"role": "assistant", "content": ""}), None));
                }
            }
            "content_block_start" => {
                let block = &data["content_block"];
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("tool_use") => {
                        self.tool_index += 1;
                        self.in_tool_block = true;
                        self.saw_tool_call = true;
                        out.push(self.chunk(
                            json!({
                                "tool_calls": [{
                                    "index": self.tool_index,
                                    "id": block["id"],
                                    "type": "function",
                                    "function": {"name": block["name"], "arguments": ""},
                                }]
                            }),
                            None,
                        ));
                    }
                    _ => self.in_tool_block = false,
                }
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                match delta.get("type").and_then(|v| v.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            out.push(self.chunk(json!({"content": text}), None));
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(thinking) = delta.get("thinking").and_then(|v| v.as_str()) {
                            out.push(self.chunk(json!({"reasoning_content": thinking}), None));
                        }
                    }
                    Some("input_json_delta") => {
                        if self.in_tool_block {
                            if let Some(partial) =
                                delta.get("partial_json").and_then(|v| v.as_str())
                            {
                                out.push(self.chunk(
                                    json!({
                                        "tool_calls": [{
                                            "index": self.tool_index,
                                            "function": {"arguments": partial},
                                        }]
                                    }),
                                    None,
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                self.in_tool_block = false;
            }
            "message_delta" => {
                let stop_reason = data
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|v| v.as_str());
                let finish = map_stop_reason(stop_reason, self.saw_tool_call);
                out.push(self.chunk(json!({}), Some(finish)));
            }
            "message_stop" => {
                out.push(Bytes::from("data: [DONE]\n\n"));
            }
            _ => {}
        }

        out
    }
}

pub fn create_openai_chunk_stream(
    mut anthropic: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    model: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    use async_stream::stream;
    use futures::StreamExt;

    Box::pin(stream! {
        let mut state = ChunkState::new(model);
        let mut parser = SseParser::new();
        let mut done_sent = false;

        while let Some(item) = anthropic.next().await {
            match item {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).to_string();
                    for (event, data) in parser.push(&text) {
                        for chunk in state.handle_event(&event, &data) {
                            if chunk.as_ref() == b"data: [DONE]\n\n".as_slice() {
                                done_sent = true;
                            }
                            yield Ok(chunk);
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }

        if !done_sent {
            yield Ok(Bytes::from("data: [DONE]\n\n"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn run(anthropic_sse: Vec<&str>) -> Vec<Value> {
        let upstream = futures::stream::iter(
            anthropic_sse
                .into_iter()
                .map(|s| Ok(Bytes::from(s.to_string())))
                .collect::<Vec<_>>(),
        );
        let mut stream = create_openai_chunk_stream(Box::pin(upstream), "sonnet".to_string());

        let mut chunks = Vec::new();
        let mut saw_done = false;
        while let Some(item) = stream.next().await {
            let bytes = item.unwrap();
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            for line in text.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if data == "[DONE]" {
                        saw_done = true;
                    } else if let Ok(v) = serde_json::from_str::<Value>(data) {
                        chunks.push(v);
                    }
                }
            }
        }
        assert!(saw_done, "stream must terminate with [DONE]");
        chunks
    }

    #[tokio::test]
    async fn text_stream_produces_role_then_content_then_finish() {
        let chunks = run(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ])
        .await;

        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "Hi");
        let last = chunks.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    }

    #[tokio::test]
    async fn tool_use_stream_emits_tool_call_chunks() {
        let chunks = run(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_2\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"lookup\",\"input\":{}}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"q\\\":\\\"x\\\"}\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ])
        .await;

        let tool_chunk = &chunks[1]["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(tool_chunk["id"], "tu_1");
        assert_eq!(tool_chunk["function"]["name"], "lookup");
        assert_eq!(tool_chunk["index"], 0);

        let args_chunk = &chunks[2]["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(args_chunk["function"]["arguments"], "{\"q\":\"x\"}");

        let last = chunks.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
    }

    #[tokio::test]
    async fn thinking_deltas_surface_as_reasoning_content() {
        let chunks = run(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_3\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"pondering\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ])
        .await;

        assert_eq!(
            chunks[1]["choices"][0]["delta"]["reasoning_content"],
            "pondering"
        );
    }
}
