//! Wire protocol between the daemon and its clients.
//!
//! A response is a plain text stream. The first segment is the marker
//! `__EMOTION__<tag>__`, glued to the beginning of the body. Everything
//! after it is raw body text.

use crate::emotion::Emotion;

pub const MARKER_PREFIX: &str = "__EMOTION__";
pub const MARKER_SUFFIX: &str = "__";

/// Longest possible marker, `__EMOTION__excited__`
pub const MAX_MARKER_LEN: usize = 20;

/// Encode the out-of-band emotion marker
pub fn marker(emotion: Emotion) -> String {
    format!("{}{}{}", MARKER_PREFIX, emotion.as_str(), MARKER_SUFFIX)
}

/// Split a complete marker off the front of `text`
pub fn split_marker(text: &str) -> Option<(Emotion, &str)> {
    let rest = text.strip_prefix(MARKER_PREFIX)?;
    let end = rest.find(MARKER_SUFFIX)?;
    let emotion = rest[..end].parse().ok()?;
    Some((emotion, &rest[end + MARKER_SUFFIX.len()..]))
}

/// What a client sees after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Emotion(Emotion),
    Text(String),
}

/// Incremental decoder for the client side.
///
/// HTTP chunking does not respect the marker boundary, so the head of the
/// stream is buffered until the marker is complete or clearly absent.
#[derive(Debug, Default)]
pub struct MarkerDecoder {
    head: String,
    resolved: bool,
}

impl MarkerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<WireEvent> {
        if self.resolved {
            return text_event(chunk.to_string());
        }

        self.head.push_str(chunk);
        if let Some((emotion, rest)) = split_marker(&self.head) {
            let rest = rest.to_string();
            self.head.clear();
            self.resolved = true;
            let mut events = vec![WireEvent::Emotion(emotion)];
            events.extend(text_event(rest));
            return events;
        }

        let could_be_marker = MARKER_PREFIX.starts_with(self.head.as_str())
            || (self.head.starts_with(MARKER_PREFIX) && self.head.len() < MAX_MARKER_LEN);
        if could_be_marker {
            return Vec::new();
        }

        self.resolved = true;
        text_event(std::mem::take(&mut self.head))
    }

    /// Flush whatever is still buffered when the stream ends
    pub fn finish(&mut self) -> Vec<WireEvent> {
        if self.resolved {
            return Vec::new();
        }
        self.resolved = true;
        text_event(std::mem::take(&mut self.head))
    }
}

fn text_event(text: String) -> Vec<WireEvent> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![WireEvent::Text(text)]
    }
}
