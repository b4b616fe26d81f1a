//! OpenAI-compatible chat-completions client (Groq by default).

use super::sse::{ErrorPayload, SseDecoder, SseEvent};
use super::{LlmError, ModelClient, ModelFactory, TokenStream};
use crate::config::{LlmSettings, TierSettings};
use crate::tiers::ModelTier;
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

/// Client for one model on an OpenAI-compatible endpoint
pub struct ChatCompletionsClient {
    http_client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        settings: &LlmSettings,
        api_key: Option<&str>,
        model: &str,
        temperature: f32,
    ) -> Result<Self, LlmError> {
        let construction = |reason: &str| LlmError::Construction {
            model: model.to_string(),
            reason: reason.to_string(),
        };

        let api_key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| construction("no API key configured"))?;
        if model.trim().is_empty() {
            return Err(construction("empty model identifier"));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| construction(&e.to_string()))?;

        Ok(Self {
            http_client,
            url: format!("{}/chat/completions", settings.endpoint.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, LlmError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream,
        };

        info!("[>]  LLM CALL [{}] ({} messages, stream: {})", self.model, messages.len(), stream);

        let mut builder = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request);
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Http {
                status: status.to_string(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let response = self.send(messages, false).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        info!("[<]  LLM RESPONSE [{}] ({} chars)", self.model, content.len());
        Ok(content)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError> {
        let response = self.send(messages, true).await?;
        debug!("Stream opened for [{}]", self.model);
        Ok(decode_token_stream(response.bytes_stream()))
    }
}

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Delta(text) => self.pending.push_back(Ok(text)),
                SseEvent::Done => self.finished = true,
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(LlmError::Stream(message)));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turn a raw SSE byte stream into a token stream
pub fn decode_token_stream<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.feed(chunk.as_ref());
                    st.absorb(events);
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(LlmError::Stream(e.to_string())));
                    st.finished = true;
                }
                None => {
                    let events = st.decoder.finish();
                    st.absorb(events);
                    st.finished = true;
                }
            }
        }
    }))
}

/// Builds [`ChatCompletionsClient`]s with per-tier temperatures
pub struct ChatCompletionsFactory {
    settings: LlmSettings,
    api_key: Option<String>,
    tiers: TierSettings,
}

impl ChatCompletionsFactory {
    pub fn new(settings: LlmSettings, api_key: Option<String>, tiers: TierSettings) -> Self {
        Self {
            settings,
            api_key,
            tiers,
        }
    }
}

impl ModelFactory for ChatCompletionsFactory {
    fn build(&self, model: &str, tier: ModelTier) -> Result<Arc<dyn ModelClient>, LlmError> {
        let client = ChatCompletionsClient::new(
            &self.settings,
            self.api_key.as_deref(),
            model,
            self.tiers.temperature(tier),
        )?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn settings() -> LlmSettings {
        LlmSettings::default()
    }

    #[test]
    fn test_missing_api_key_is_construction_error() {
        let err = ChatCompletionsClient::new(&settings(), None, "llama-3.1-8b-instant", 0.4)
            .err()
            .unwrap();
        assert!(err.is_construction());

        let err = ChatCompletionsClient::new(&settings(), Some("  "), "m", 0.4)
            .err()
            .unwrap();
        assert!(err.is_construction());
    }

    #[test]
    fn test_empty_model_is_construction_error() {
        let err = ChatCompletionsClient::new(&settings(), Some("key"), "", 0.4)
            .err()
            .unwrap();
        assert!(err.is_construction());
    }

    #[test]
    fn test_client_url_and_model() {
        let client = ChatCompletionsClient::new(&settings(), Some("key"), "gemma2-9b-it", 0.4).unwrap();
        assert_eq!(client.model(), "gemma2-9b-it");
        assert!(client.url.ends_with("/chat/completions"));
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "m",
            messages: &messages,
            temperature: 0.6,
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream"], true);
    }

    #[tokio::test]
    async fn test_decode_token_stream_stops_at_done() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"[EMO\"}}]}\n\nda".to_vec()),
            Ok(b"ta: {\"choices\":[{\"delta\":{\"content\":\"TION: calm] Hi\"}}]}\n\n".to_vec()),
            Ok(b"data: [DONE]\n\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n".to_vec()),
        ];
        let tokens: Vec<_> = decode_token_stream(stream::iter(parts)).collect().await;
        let tokens: Vec<String> = tokens.into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(tokens, vec!["[EMO", "TION: calm] Hi"]);
    }

    #[tokio::test]
    async fn test_decode_token_stream_surfaces_transport_error() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err("connection reset".to_string()),
        ];
        let tokens: Vec<_> = decode_token_stream(stream::iter(parts)).collect().await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].as_ref().unwrap(), "a");
        assert!(matches!(tokens[1], Err(LlmError::Stream(_))));
    }
}
