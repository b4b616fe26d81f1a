//! HTTP API types shared by cypherd and its clients.

use crate::emotion::Emotion;
use serde::{Deserialize, Serialize};

/// Response header naming the thread a streamed reply belongs to
pub const THREAD_ID_HEADER: &str = "x-thread-id";

/// Body of `POST /chat` and `POST /chat_stream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Temporary chats are neither stored nor counted
    #[serde(default)]
    pub is_temp: bool,
    /// "high" selects the primary tier, anything else the fast tier
    #[serde(default = "default_complexity")]
    pub complexity: String,
}

fn default_complexity() -> String {
    "high".to_string()
}

impl ChatRequest {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            thread_id: None,
            is_temp: false,
            complexity: default_complexity(),
        }
    }
}

/// Body of the non-streaming reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub emotion: Emotion,
    pub text: String,
    pub thread_id: Option<String>,
}

/// Body of `PATCH /threads/:id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadUpdate {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}
