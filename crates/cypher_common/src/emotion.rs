//! Emotion tags - the closed vocabulary that drives the UI avatar.
//!
//! The model is asked to open every answer with `[EMOTION: <value>]`.
//! The tag is never trusted: detection goes through [`find_tag`] and a
//! missing or malformed tag falls back to [`Emotion::Normal`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Length of the longest well-formed tag literal, `[EMOTION: excited]`.
pub const LONGEST_TAG_LEN: usize = 18;

/// Emotion signalled alongside an assistant response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Calm,
    Excited,
    Sad,
    #[default]
    Normal,
    Angry,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Calm,
        Emotion::Excited,
        Emotion::Sad,
        Emotion::Normal,
        Emotion::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Calm => "calm",
            Emotion::Excited => "excited",
            Emotion::Sad => "sad",
            Emotion::Normal => "normal",
            Emotion::Angry => "angry",
        }
    }

    /// Tag literal as the model is instructed to write it
    pub fn tag(&self) -> String {
        format!("[EMOTION: {}]", self.as_str())
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion '{0}'")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calm" => Ok(Emotion::Calm),
            "excited" => Ok(Emotion::Excited),
            "sad" => Ok(Emotion::Sad),
            "normal" => Ok(Emotion::Normal),
            "angry" => Ok(Emotion::Angry),
            other => Err(UnknownEmotion(other.to_string())),
        }
    }
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\[EMOTION:\s*(angry|calm|excited|sad|normal)\]")
            .unwrap_or_else(|e| panic!("emotion tag pattern is invalid: {}", e))
    })
}

/// A tag located inside a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub emotion: Emotion,
    pub start: usize,
    pub end: usize,
}

/// Locate the first well-formed emotion tag in `text`
pub fn find_tag(text: &str) -> Option<TagMatch> {
    let caps = tag_pattern().captures(text)?;
    let whole = caps.get(0)?;
    let emotion = caps.get(1)?.as_str().parse().ok()?;
    Some(TagMatch {
        emotion,
        start: whole.start(),
        end: whole.end(),
    })
}

/// Result of resolving the emotion of a block of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub emotion: Emotion,
    /// Text with tag syntax removed and leading whitespace stripped
    pub body: String,
    /// Whether a well-formed tag was present
    pub tagged: bool,
}

/// Resolve the emotion of `text` in a single pass.
///
/// The first tag decides the emotion. Every well-formed tag occurrence is
/// removed so the body never carries tag syntax.
pub fn resolve(text: &str) -> Resolved {
    match find_tag(text) {
        Some(found) => {
            let stripped = tag_pattern().replace_all(text, "");
            Resolved {
                emotion: found.emotion,
                body: stripped.trim_start().to_string(),
                tagged: true,
            }
        }
        None => Resolved {
            emotion: Emotion::Normal,
            body: text.to_string(),
            tagged: false,
        },
    }
}

/// Whether `text` still contains emotion tag syntax
pub fn contains_tag(text: &str) -> bool {
    tag_pattern().is_match(text)
}
