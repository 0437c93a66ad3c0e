/// Accumulates OpenAI-style SSE `data: {...}` frames into the assembled
/// completion text, stopping early once the content looks like a complete
/// top-level JSON object or a stop sequence appears (§4.2 "balances braces,
/// terminates on the first top-level closing brace or on a stop sequence").
pub struct SseAccumulator {
    buffer: String,
    accumulated: String,
    reasoning: String,
    brace_depth: i32,
    saw_open_brace: bool,
    stop_sequences: Vec<String>,
}

impl SseAccumulator {
    pub fn new(stop_sequences: Vec<String>) -> Self {
        Self {
            buffer: String::new(),
            accumulated: String::new(),
            reasoning: String::new(),
            brace_depth: 0,
            saw_open_brace: false,
            stop_sequences,
        }
    }

    /// Feeds a raw chunk of bytes from the HTTP stream. Returns `true` once
    /// termination conditions are met and no further chunks should be read.
    pub fn feed(&mut self, chunk: &str) -> bool {
        self.buffer.push_str(chunk);

        loop {
            let Some(frame_end) = self.buffer.find("\n\n") else {
                break;
            };
            let frame = self.buffer[..frame_end].to_string();
            self.buffer.drain(..frame_end + 2);

            for line in frame.lines() {
                let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return true;
                }
                if let Some(reasoning_delta) = extract_field(data, "reasoning") {
                    self.reasoning.push_str(&reasoning_delta);
                }
                if let Some(delta) = extract_field(data, "content") {
                    if self.push_delta(&delta) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn push_delta(&mut self, delta: &str) -> bool {
        for ch in delta.chars() {
            self.accumulated.push(ch);

            if ch == '{' {
                self.saw_open_brace = true;
                self.brace_depth += 1;
            } else if ch == '}' {
                self.brace_depth -= 1;
            }

            for stop in &self.stop_sequences {
                if !stop.is_empty() && self.accumulated.ends_with(stop.as_str()) {
                    let cut = self.accumulated.len() - stop.len();
                    self.accumulated.truncate(cut);
                    return true;
                }
            }
        }

        self.saw_open_brace && self.brace_depth <= 0
    }

    pub fn finish(self) -> String {
        self.accumulated
    }

    /// Non-empty only when the vendor streamed a `delta.reasoning` alongside
    /// an empty `delta.content` (§4.2 "reasoning-field extraction").
    pub fn reasoning(&self) -> Option<&str> {
        if self.reasoning.trim().is_empty() {
            None
        } else {
            Some(&self.reasoning)
        }
    }
}

fn extract_field(data_json: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data_json).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get(field)?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_plain_text_deltas() {
        let mut acc = SseAccumulator::new(vec![]);
        acc.feed("data: {\"choices\":[{\"delta\":{\"content\":\"Hello \"}}]}\n\n");
        acc.feed("data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n");
        assert_eq!(acc.finish(), "Hello world");
    }

    #[test]
    fn terminates_on_balanced_top_level_json() {
        let mut acc = SseAccumulator::new(vec![]);
        acc.feed("data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"a\\\":1}\"}}]}\n\n");
        assert_eq!(acc.finish(), "{\"a\":1}");
    }

    #[test]
    fn terminates_on_stop_sequence() {
        let mut acc = SseAccumulator::new(vec!["STOP".to_string()]);
        let terminated = acc.feed("data: {\"choices\":[{\"delta\":{\"content\":\"helloSTOP\"}}]}\n\n");
        assert!(terminated);
        assert_eq!(acc.finish(), "hello");
    }

    #[test]
    fn captures_reasoning_alongside_empty_content() {
        let mut acc = SseAccumulator::new(vec![]);
        acc.feed("data: {\"choices\":[{\"delta\":{\"reasoning\":\"| Segment ID | Speaker |\"}}]}\n\n");
        assert_eq!(acc.reasoning(), Some("| Segment ID | Speaker |"));
        assert_eq!(acc.finish(), "");
    }

    #[test]
    fn stops_on_done_marker() {
        let mut acc = SseAccumulator::new(vec![]);
        acc.feed("data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n");
        let done = acc.feed("data: [DONE]\n\n");
        assert!(done);
        assert_eq!(acc.finish(), "partial");
    }
}
