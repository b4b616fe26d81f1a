//! HTTP client for communicating with cypherd.

use anyhow::{anyhow, Context, Result};
use cypher_common::api::{ChatRequest, HealthResponse, InfoResponse, ThreadUpdate, THREAD_ID_HEADER};
use cypher_common::types::{ConversationThread, StoredMessage};
use cypher_common::wire::{MarkerDecoder, WireEvent};
use futures::StreamExt;

/// Reassembles UTF-8 text from byte chunks cut at arbitrary points
#[derive(Debug, Default)]
pub struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    /// Append bytes, return the longest complete prefix
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Genuinely invalid bytes: give up on exactness
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return text;
            }
        };
        let rest = self.pending.split_off(valid);
        let done = std::mem::replace(&mut self.pending, rest);
        String::from_utf8_lossy(&done).into_owned()
    }

    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Client for the cypherd HTTP API
pub struct CypherClient {
    http: reqwest::Client,
    base_url: String,
}

impl CypherClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("cypherd returned {}: {}", status, body))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            anyhow!(
                "Cannot reach CYPHER daemon at {}: {}\n\n\
                 Start it with `cypherd` or point --url at a running instance.",
                self.base_url,
                e
            )
        })?;
        self.check(response).await
    }

    /// Stream a reply, handing each decoded event to `on_event`.
    /// Returns the thread the reply was stored in.
    pub async fn chat_stream<F>(&self, body: &ChatRequest, mut on_event: F) -> Result<Option<String>>
    where
        F: FnMut(WireEvent),
    {
        let response = self
            .send(self.http.post(self.url("/chat_stream")).json(body))
            .await?;
        let thread_id = response
            .headers()
            .get(THREAD_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = response.bytes_stream();
        let mut text = Utf8Buffer::default();
        let mut decoder = MarkerDecoder::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.context("Stream interrupted")?;
            decoder.push(&text.push(&chunk)).into_iter().for_each(&mut on_event);
        }
        decoder.push(&text.finish()).into_iter().for_each(&mut on_event);
        decoder.finish().into_iter().for_each(&mut on_event);

        Ok(thread_id)
    }

    pub async fn threads(&self) -> Result<Vec<ConversationThread>> {
        let response = self.send(self.http.get(self.url("/threads"))).await?;
        Ok(response.json().await?)
    }

    pub async fn thread_messages(&self, id: &str) -> Result<Vec<StoredMessage>> {
        let response = self
            .send(self.http.get(self.url(&format!("/threads/{}", id))))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn rename_thread(&self, id: &str, title: &str) -> Result<()> {
        self.send(
            self.http
                .patch(self.url(&format!("/threads/{}", id)))
                .json(&ThreadUpdate {
                    title: title.to_string(),
                }),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_thread(&self, id: &str) -> Result<()> {
        self.send(self.http.delete(self.url(&format!("/threads/{}", id))))
            .await?;
        Ok(())
    }

    pub async fn info(&self, query: &str) -> Result<String> {
        let response = self
            .send(self.http.get(self.url("/info")).query(&[("query", query)]))
            .await?;
        let info: InfoResponse = response.json().await?;
        Ok(info.answer)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send(self.http.get(self.url("/health"))).await?;
        Ok(response.json().await?)
    }
}
