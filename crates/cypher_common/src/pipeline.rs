//! Streaming response pipeline.
//!
//! Upstream tokens are buffered until the emotion tag can be located or
//! ruled out, then forwarded verbatim. The emotion is emitted exactly once,
//! always before the first text chunk.

use crate::emotion::{self, Emotion};
use crate::wire;
use tracing::{debug, warn};

/// Output of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Emotion(Emotion),
    Text(String),
}

#[derive(Debug)]
enum FilterState {
    Accumulating { buffer: String, chars: usize },
    Streaming,
}

/// Per-request state machine separating the emotion tag from the body
#[derive(Debug)]
pub struct EmotionStreamFilter {
    lookahead: usize,
    state: FilterState,
    emotion: Option<Emotion>,
    transcript: String,
}

impl EmotionStreamFilter {
    /// `lookahead` is the number of buffered characters that forces resolution
    pub fn new(lookahead: usize) -> Self {
        Self {
            lookahead: lookahead.max(emotion::LONGEST_TAG_LEN),
            state: FilterState::Accumulating {
                buffer: String::new(),
                chars: 0,
            },
            emotion: None,
            transcript: String::new(),
        }
    }

    /// Feed one upstream token
    pub fn push(&mut self, token: &str) -> Vec<PipelineEvent> {
        match &mut self.state {
            FilterState::Streaming => self.forward(token.to_string()),
            FilterState::Accumulating { buffer, chars } => {
                buffer.push_str(token);
                *chars += token.chars().count();
                if *chars > self.lookahead {
                    self.resolve()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Upstream ended normally
    pub fn finish(&mut self) -> Vec<PipelineEvent> {
        match self.state {
            FilterState::Accumulating { .. } => self.resolve(),
            FilterState::Streaming => Vec::new(),
        }
    }

    /// Upstream failed; `message` becomes the terminal text chunk
    pub fn fail(&mut self, message: &str) -> Vec<PipelineEvent> {
        let mut events = self.finish();
        if !message.is_empty() {
            events.push(PipelineEvent::Text(message.to_string()));
        }
        events
    }

    /// Emotion, once resolved
    pub fn emotion(&self) -> Option<Emotion> {
        self.emotion
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, FilterState::Streaming)
    }

    /// Every body chunk emitted so far, concatenated
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Assistant content to persist
    pub fn persisted_content(&self) -> String {
        self.transcript.trim().to_string()
    }

    fn resolve(&mut self) -> Vec<PipelineEvent> {
        let buffer = match std::mem::replace(&mut self.state, FilterState::Streaming) {
            FilterState::Accumulating { buffer, .. } => buffer,
            FilterState::Streaming => return Vec::new(),
        };

        let resolved = emotion::resolve(&buffer);
        if resolved.tagged {
            debug!("Emotion tag resolved: {}", resolved.emotion);
        } else {
            warn!(
                "No emotion tag in the first {} characters, using {}",
                buffer.chars().count(),
                resolved.emotion
            );
        }

        self.emotion = Some(resolved.emotion);
        let mut events = vec![PipelineEvent::Emotion(resolved.emotion)];
        events.extend(self.forward(resolved.body));
        events
    }

    fn forward(&mut self, text: String) -> Vec<PipelineEvent> {
        if text.is_empty() {
            return Vec::new();
        }
        self.transcript.push_str(&text);
        vec![PipelineEvent::Text(text)]
    }
}

/// Render events as one wire segment, gluing the marker to the body
pub fn to_wire(events: &[PipelineEvent]) -> String {
    let mut out = String::new();
    for event in events {
        match event {
            PipelineEvent::Emotion(emotion) => out.push_str(&wire::marker(*emotion)),
            PipelineEvent::Text(text) => out.push_str(text),
        }
    }
    out
}

/// Run a whole response through a fresh filter
pub fn filter_complete(text: &str, lookahead: usize) -> (Emotion, String) {
    let mut filter = EmotionStreamFilter::new(lookahead);
    filter.push(text);
    filter.finish();
    (
        filter.emotion().unwrap_or_default(),
        filter.persisted_content(),
    )
}
