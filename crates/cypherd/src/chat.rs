//! Chat request orchestration.
//!
//! Per request: classify intent, bump familiarity, make sure a thread
//! exists, fetch history, build the prompt, then hand the upstream stream
//! to a spawned pipeline task that feeds the HTTP body through a channel.

pub use cypher_common::api::{ChatReply, ChatRequest};
use cypher_common::config::StreamSettings;
use cypher_common::emotion::Emotion;
use cypher_common::pipeline::{filter_complete, to_wire, EmotionStreamFilter, PipelineEvent};
use cypher_common::profile::{classify_intent, ProfileStore};
use cypher_common::prompts::build_system_prompt;
use cypher_common::store::ConversationStore;
use cypher_common::tiers::{FailoverController, FailoverError, ModelTier};
use cypher_common::types::{thread_title, ChatMessage, Role};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A response being streamed in the wire format
pub struct ChatStream {
    pub thread_id: Option<String>,
    pub segments: mpsc::Receiver<String>,
}

/// Everything the upstream call needs, resolved before it starts
struct PreparedChat {
    thread_id: Option<String>,
    messages: Vec<ChatMessage>,
    tier: ModelTier,
    persist: bool,
}

/// User-facing text for a request that could not be served
pub fn terminal_message(error: &FailoverError) -> String {
    match error {
        FailoverError::Tier(e) => format!(
            "Network error: Unable to reach the AI model. Please try again. ({})",
            e
        ),
        FailoverError::Connection(_) => "Connection error. Please try again in a moment.".to_string(),
    }
}

fn terminal_events(error: &FailoverError) -> Vec<PipelineEvent> {
    vec![
        PipelineEvent::Emotion(Emotion::Sad),
        PipelineEvent::Text(terminal_message(error)),
    ]
}

pub struct ChatService {
    failover: Arc<FailoverController>,
    store: Arc<dyn ConversationStore>,
    profile: Arc<ProfileStore>,
    settings: StreamSettings,
}

impl ChatService {
    pub fn new(
        failover: Arc<FailoverController>,
        store: Arc<dyn ConversationStore>,
        profile: Arc<ProfileStore>,
        settings: StreamSettings,
    ) -> Self {
        if settings.lookahead_was_clamped() {
            warn!(
                "Lookahead {} is shorter than the longest tag, using {}",
                settings.lookahead_chars,
                settings.effective_lookahead()
            );
        }
        Self {
            failover,
            store,
            profile,
            settings,
        }
    }

    pub fn failover(&self) -> &FailoverController {
        &self.failover
    }

    /// Start a streamed response
    pub async fn stream_chat(&self, request: ChatRequest) -> ChatStream {
        let prepared = self.prepare(&request).await;
        let thread_id = prepared.thread_id.clone();
        let (tx, rx) = mpsc::channel(64);

        let failover = Arc::clone(&self.failover);
        let store = Arc::clone(&self.store);
        let lookahead = self.settings.effective_lookahead();
        tokio::spawn(async move {
            run_pipeline(failover, store, prepared, lookahead, tx).await;
        });

        ChatStream {
            thread_id,
            segments: rx,
        }
    }

    /// Complete response in one piece
    pub async fn respond(&self, request: ChatRequest) -> ChatReply {
        let prepared = self.prepare(&request).await;

        let (emotion, text) = match self.failover.invoke(prepared.tier, &prepared.messages).await {
            Ok((opened, raw)) => {
                debug!("[{}] answered {} chars", opened.model, raw.len());
                let (emotion, body) = filter_complete(&raw, self.settings.effective_lookahead());
                if let (true, Some(thread_id)) = (prepared.persist, prepared.thread_id.as_deref()) {
                    persist_reply(self.store.as_ref(), thread_id, &body).await;
                }
                (emotion, body)
            }
            Err(e) => {
                warn!("Chat request failed: {}", e);
                (Emotion::Sad, terminal_message(&e))
            }
        };

        ChatReply {
            emotion,
            text,
            thread_id: prepared.thread_id,
        }
    }

    async fn prepare(&self, request: &ChatRequest) -> PreparedChat {
        let persist = !request.is_temp;
        self.record_interaction(&request.message, persist);

        let context = self.profile.get_context().await;
        let system_prompt = build_system_prompt(&context);

        let mut thread_id = request.thread_id.clone().filter(|id| !id.is_empty());
        if persist && thread_id.is_none() {
            match self.store.create_thread(&thread_title(&request.message)).await {
                Ok(id) => {
                    info!("New thread {}", id);
                    thread_id = Some(id);
                }
                Err(e) => warn!("Could not create thread: {}", e),
            }
        }

        let mut history = Vec::new();
        if let (true, Some(id)) = (persist, thread_id.as_deref()) {
            match self
                .store
                .get_recent_history(id, self.settings.history_limit)
                .await
            {
                Ok(messages) => history = messages,
                Err(e) => warn!("Could not load history for {}: {}", id, e),
            }
            if let Err(e) = self.store.store_message(id, Role::User, &request.message).await {
                warn!("Could not store user message in {}: {}", id, e);
            }
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.into_iter().filter(|m| m.role != Role::System));
        messages.push(ChatMessage::user(request.message.clone()));

        PreparedChat {
            thread_id: if persist { thread_id } else { None },
            messages,
            tier: ModelTier::from_complexity(&request.complexity),
            persist,
        }
    }

    /// Mood and familiarity updates, off the response path
    fn record_interaction(&self, message: &str, count: bool) {
        let intent = classify_intent(message);
        let profile = Arc::clone(&self.profile);
        debug!("Query intent: {}", intent);

        tokio::spawn(async move {
            if let Err(e) = profile.set_mood(intent).await {
                warn!("Profile mood update failed: {}", e);
            }
            if count {
                if let Err(e) = profile.increment_familiarity().await {
                    warn!("Familiarity update failed: {}", e);
                }
            }
        });
    }
}

async fn persist_reply(store: &dyn ConversationStore, thread_id: &str, content: &str) {
    if let Err(e) = store.store_message(thread_id, Role::Assistant, content).await {
        warn!("Could not store reply in {}: {}", thread_id, e);
    }
}

/// Send one wire segment; false once the consumer is gone
async fn send(tx: &mpsc::Sender<String>, events: &[PipelineEvent]) -> bool {
    let segment = to_wire(events);
    if segment.is_empty() {
        return true;
    }
    tx.send(segment).await.is_ok()
}

async fn run_pipeline(
    failover: Arc<FailoverController>,
    store: Arc<dyn ConversationStore>,
    prepared: PreparedChat,
    lookahead: usize,
    tx: mpsc::Sender<String>,
) {
    // Opening the upstream can stall as long as the first token can
    let result = tokio::select! {
        biased;
        _ = tx.closed() => {
            info!("[x]  STREAM client disconnected while the upstream was opening");
            return;
        }
        result = failover.stream(prepared.tier, &prepared.messages) => result,
    };

    let (opened, mut tokens) = match result {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Chat stream failed before the first token: {}", e);
            send(&tx, &terminal_events(&e)).await;
            return;
        }
    };
    info!("[>]  STREAM [{}] tier {}", opened.model, opened.tier);

    let mut filter = EmotionStreamFilter::new(lookahead);
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                info!("[x]  STREAM [{}] client disconnected", opened.model);
                return;
            }
            next = tokens.next() => next,
        };

        match next {
            Some(Ok(token)) => {
                if !send(&tx, &filter.push(&token)).await {
                    info!("[x]  STREAM [{}] client disconnected", opened.model);
                    return;
                }
            }
            Some(Err(e)) => {
                warn!("[!]  STREAM [{}] interrupted: {}", opened.model, e);
                send(&tx, &filter.fail(&format!(" [Study Engine Error: {}]", e))).await;
                return;
            }
            None => break,
        }
    }
    drop(tokens);

    if !send(&tx, &filter.finish()).await {
        info!("[x]  STREAM [{}] client left before the end", opened.model);
        return;
    }
    info!(
        "[<]  STREAM [{}] done ({}, {} chars)",
        opened.model,
        filter.emotion().unwrap_or_default(),
        filter.transcript().len()
    );

    if let (true, Some(thread_id)) = (prepared.persist, prepared.thread_id.as_deref()) {
        persist_reply(store.as_ref(), thread_id, &filter.persisted_content()).await;
    }
}
