//! Server-sent-events decoder for OpenAI-compatible streaming completions.
//!
//! Bytes arrive in arbitrary slices, so partial lines (and partial UTF-8
//! sequences) stay buffered until their newline shows up.

use serde::Deserialize;

/// Decoded stream item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A content delta (never empty)
    Delta(String),
    /// Upstream signalled the end with `[DONE]`
    Done,
    /// Upstream sent an error object mid-stream
    Error(String),
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, get every event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the byte stream closes
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        parse_line(line.trim()).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<ChunkPayload>(data) {
        Ok(payload) => {
            if let Some(err) = payload.error {
                return Some(SseEvent::Error(err.message));
            }
            let content: String = payload
                .choices
                .into_iter()
                .filter_map(|c| c.delta.and_then(|d| d.content))
                .collect();
            if content.is_empty() {
                None
            } else {
                Some(SseEvent::Delta(content))
            }
        }
        Err(e) => {
            tracing::debug!("Skipping undecodable stream line: {} ({})", data, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    #[test]
    fn test_decodes_deltas_and_done() {
        let mut decoder = SseDecoder::new();
        let mut input = chunk("Hel");
        input.push_str(&chunk("lo"));
        input.push_str("data: [DONE]\n\n");

        let events = decoder.feed(input.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Delta("Hel".to_string()),
                SseEvent::Delta("lo".to_string()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn test_line_split_across_feeds() {
        let mut decoder = SseDecoder::new();
        let line = chunk("[EMOTION: calm] Hi");
        let (a, b) = line.as_bytes().split_at(17);
        assert!(decoder.feed(a).is_empty());
        assert_eq!(
            decoder.feed(b),
            vec![SseEvent::Delta("[EMOTION: calm] Hi".to_string())]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_feeds() {
        let mut decoder = SseDecoder::new();
        let line = chunk("café");
        let bytes = line.as_bytes();
        let cut = line.find('é').unwrap() + 1;
        assert!(decoder.feed(&bytes[..cut]).is_empty());
        assert_eq!(
            decoder.feed(&bytes[cut..]),
            vec![SseEvent::Delta("café".to_string())]
        );
    }

    #[test]
    fn test_role_only_delta_and_comments_are_skipped() {
        let mut decoder = SseDecoder::new();
        let input = ": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        assert!(decoder.feed(input.as_bytes()).is_empty());
    }

    #[test]
    fn test_error_payload() {
        let mut decoder = SseDecoder::new();
        let input = "data: {\"error\":{\"message\":\"Rate limit reached\"}}\n";
        assert_eq!(
            decoder.feed(input.as_bytes()),
            vec![SseEvent::Error("Rate limit reached".to_string())]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Done]);
    }
}
