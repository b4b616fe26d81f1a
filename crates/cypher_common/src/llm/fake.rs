//! Scripted model clients for tests.
//!
//! A [`FakeModelClient`] replays a fixed script on every call and records
//! what it was asked. [`StreamProbe`] lets a test see whether the token
//! stream was pulled and released.

use super::{LlmError, ModelClient, ModelFactory, TokenStream};
use crate::tiers::ModelTier;
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::Stream;
use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// One step of a scripted token stream
#[derive(Debug, Clone)]
pub enum FakeStep {
    Token(String),
    Fail(LlmError),
    /// Never yields again; the consumer has to give up
    Hang,
}

impl FakeStep {
    pub fn token(text: &str) -> Self {
        FakeStep::Token(text.to_string())
    }
}

/// Observes the life of streams handed out by a fake client
#[derive(Debug, Clone, Default)]
pub struct StreamProbe {
    pulls: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl StreamProbe {
    /// Number of `poll_next` calls across all streams
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Upstream resources taken, by open streams or by opens still pending
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Every opened stream has been dropped
    pub fn all_released(&self) -> bool {
        self.opened() == self.released()
    }
}

struct ScriptedStream {
    steps: VecDeque<FakeStep>,
    probe: StreamProbe,
}

impl Stream for ScriptedStream {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(FakeStep::Token(text)) => Poll::Ready(Some(Ok(text))),
            Some(FakeStep::Fail(err)) => Poll::Ready(Some(Err(err))),
            Some(FakeStep::Hang) => {
                self.steps.push_front(FakeStep::Hang);
                Poll::Pending
            }
            None => Poll::Ready(None),
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Held by an open that never completes; released when the call is dropped
struct PendingOpen(StreamProbe);

impl Drop for PendingOpen {
    fn drop(&mut self) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fake client replaying the same script on every call
pub struct FakeModelClient {
    model: String,
    invoke_response: Result<String, LlmError>,
    stream_script: Result<Vec<FakeStep>, LlmError>,
    stall_open: bool,
    invoke_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    last_messages: Mutex<Vec<ChatMessage>>,
    probe: StreamProbe,
}

impl FakeModelClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            invoke_response: Err(LlmError::EmptyResponse),
            stream_script: Ok(Vec::new()),
            stall_open: false,
            invoke_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
            probe: StreamProbe::default(),
        }
    }

    /// Both `invoke` and `stream` answer with `text` (streamed as one token)
    pub fn answering(model: &str, text: &str) -> Self {
        Self::new(model)
            .with_invoke(Ok(text.to_string()))
            .with_stream(vec![FakeStep::token(text)])
    }

    /// Both `invoke` and opening a stream fail with `error`
    pub fn failing(model: &str, error: LlmError) -> Self {
        Self::new(model)
            .with_invoke(Err(error.clone()))
            .with_stream_error(error)
    }

    pub fn with_invoke(mut self, response: Result<String, LlmError>) -> Self {
        self.invoke_response = response;
        self
    }

    pub fn with_stream(mut self, steps: Vec<FakeStep>) -> Self {
        self.stream_script = Ok(steps);
        self
    }

    /// Opening a stream never returns, like an upstream that sends no headers
    pub fn with_stalled_open(mut self) -> Self {
        self.stall_open = true;
        self
    }

    pub fn with_stream_error(mut self, error: LlmError) -> Self {
        self.stream_script = Err(error);
        self
    }

    pub fn invoke_calls(&self) -> usize {
        self.invoke_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Messages received by the most recent call
    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn probe(&self) -> StreamProbe {
        self.probe.clone()
    }

    fn record(&self, messages: &[ChatMessage]) {
        *self.last_messages.lock().unwrap_or_else(|e| e.into_inner()) = messages.to_vec();
    }
}

#[async_trait]
impl ModelClient for FakeModelClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.invoke_calls.fetch_add(1, Ordering::SeqCst);
        self.record(messages);
        self.invoke_response.clone()
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(messages);
        if self.stall_open {
            self.probe.opened.fetch_add(1, Ordering::SeqCst);
            let _held = PendingOpen(self.probe.clone());
            futures::future::pending::<()>().await;
        }
        let steps = self.stream_script.clone()?;
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(ScriptedStream {
            steps: steps.into(),
            probe: self.probe.clone(),
        }))
    }
}

/// Factory handing out pre-registered fake clients
#[derive(Default)]
pub struct FakeModelFactory {
    clients: HashMap<String, Arc<FakeModelClient>>,
    broken: HashSet<String>,
    attempts: Mutex<Vec<String>>,
}

impl FakeModelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: FakeModelClient) -> Self {
        self.clients
            .insert(client.model.clone(), Arc::new(client));
        self
    }

    /// Building this model always fails at construction time
    pub fn with_broken(mut self, model: &str) -> Self {
        self.broken.insert(model.to_string());
        self
    }

    pub fn client(&self, model: &str) -> Option<Arc<FakeModelClient>> {
        self.clients.get(model).cloned()
    }

    /// Every model identifier `build` was called with, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ModelFactory for FakeModelFactory {
    fn build(&self, model: &str, _tier: ModelTier) -> Result<Arc<dyn ModelClient>, LlmError> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).push(model.to_string());

        if self.broken.contains(model) {
            return Err(LlmError::Construction {
                model: model.to_string(),
                reason: "rejected by provider".to_string(),
            });
        }

        match self.clients.get(model) {
            Some(client) => {
                let client: Arc<dyn ModelClient> = client.clone();
                Ok(client)
            }
            None => Err(LlmError::Construction {
                model: model.to_string(),
                reason: "unknown model".to_string(),
            }),
        }
    }
}
