use serde_json::Value;

/// Incremental SSE parser. Bytes arrive in arbitrary chunk boundaries; this
/// keeps the partial tail line buffered and yields completed events.
pub struct SseParser {
    buffer: String,
    current_event: String,
    current_data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            current_event: String::new(),
            current_data: String::new(),
        }
    }

    /// Feeds a chunk of UTF-8 text, returning every `(event, data)` pair
    /// completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<(String, Value)> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.current_data.is_empty() {
                    if let Ok(data) = serde_json::from_str::<Value>(&self.current_data) {
                        events.push((self.current_event.clone(), data));
                    }
                }
                self.current_event.clear();
                self.current_data.clear();
                continue;
            }

            if let Some(value) = line.strip_prefix("event:") {
                self.current_event = value.trim_start().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                self.current_data = value.trim_start().to_string();
            }
        }

        events
    }

    /// Flushes a trailing event that was never terminated by a blank line.
    pub fn finish(&mut self) -> Option<(String, Value)> {
        if self.current_data.is_empty() {
            return None;
        }
        let data = serde_json::from_str::<Value>(&self.current_data).ok()?;
        let event = std::mem::take(&mut self.current_event);
        self.current_data.clear();
        Some((event, data))
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}
