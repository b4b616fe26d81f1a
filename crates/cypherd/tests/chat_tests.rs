//! Chat service tests: prompt assembly, streaming, persistence, cancellation

use async_trait::async_trait;
use cypher_common::config::{StreamSettings, TierSettings};
use cypher_common::llm::{FakeModelClient, FakeModelFactory, FakeStep, LlmError};
use cypher_common::profile::ProfileStore;
use cypher_common::store::{
    ConversationStore, SqliteConversationStore, StoreError, StoreLocation, StoreResult,
};
use cypher_common::tiers::{FailoverController, TierState};
use cypher_common::types::{ChatMessage, ConversationThread, Role, StoredMessage};
use cypher_common::Emotion;
use cypherd::chat::{ChatRequest, ChatService, ChatStream};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    service: ChatService,
    store: Arc<SqliteConversationStore>,
    factory: Arc<FakeModelFactory>,
    _dir: TempDir,
}

fn service_with(factory: Arc<FakeModelFactory>, store: Arc<dyn ConversationStore>, dir: &TempDir) -> ChatService {
    let profile = Arc::new(ProfileStore::new(dir.path().join("memory.json")));
    let tiers = TierSettings {
        primary: vec!["p".to_string()],
        fast: vec!["f".to_string()],
        ..TierSettings::default()
    };
    let failover = Arc::new(FailoverController::new(
        tiers.catalog().unwrap(),
        Arc::new(TierState::init()),
        factory,
    ));
    ChatService::new(failover, store, profile, StreamSettings::default())
}

async fn harness(factory: FakeModelFactory) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteConversationStore::open(StoreLocation::InMemory)
            .await
            .unwrap(),
    );
    let factory = Arc::new(factory);
    let service = service_with(factory.clone(), store.clone(), &dir);

    Harness {
        service,
        store,
        factory,
        _dir: dir,
    }
}

async fn drain(mut stream: ChatStream) -> String {
    let mut out = String::new();
    while let Some(segment) = stream.segments.recv().await {
        out.push_str(&segment);
    }
    out
}

fn recursion_client(model: &str) -> FakeModelClient {
    FakeModelClient::new(model).with_stream(vec![
        FakeStep::token("[EMOTION: calm] Recursion is when"),
        FakeStep::token(" a function calls itself."),
    ])
}

#[tokio::test]
async fn test_what_is_recursion_end_to_end() {
    let h = harness(FakeModelFactory::new().with_client(recursion_client("p"))).await;

    let stream = h.service.stream_chat(ChatRequest::new("what is recursion")).await;
    let thread_id = stream.thread_id.clone().expect("thread created");
    let out = drain(stream).await;

    assert!(out.starts_with("__EMOTION__calm__"));
    assert_eq!(out, "__EMOTION__calm__Recursion is when a function calls itself.");

    let sent = h.factory.client("p").unwrap().last_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].role, Role::System);
    assert!(sent[0].content.contains("explain concepts from the basics"));
    assert_eq!(sent[1].content, "what is recursion");

    let stored = h.store.get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[1].role, Role::Assistant);
    assert_eq!(stored[1].content, "Recursion is when a function calls itself.");

    let thread = h.store.get_thread(&thread_id).await.unwrap().unwrap();
    assert_eq!(thread.title, "what is recursion");
}

#[tokio::test]
async fn test_history_excludes_the_new_message() {
    let h = harness(FakeModelFactory::new().with_client(recursion_client("p"))).await;

    let first = h.service.stream_chat(ChatRequest::new("what is recursion")).await;
    let thread_id = first.thread_id.clone().unwrap();
    drain(first).await;

    let mut follow_up = ChatRequest::new("show me an example");
    follow_up.thread_id = Some(thread_id.clone());
    let second = h.service.stream_chat(follow_up).await;
    assert_eq!(second.thread_id.as_deref(), Some(thread_id.as_str()));
    drain(second).await;

    let sent = h.factory.client("p").unwrap().last_messages();
    let roles: Vec<Role> = sent.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(sent[3].content, "show me an example");
    assert_eq!(h.store.get_thread_messages(&thread_id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_temporary_chat_is_not_stored() {
    let h = harness(FakeModelFactory::new().with_client(recursion_client("p"))).await;

    let mut req = ChatRequest::new("what is recursion");
    req.is_temp = true;
    let stream = h.service.stream_chat(req).await;
    assert!(stream.thread_id.is_none());
    assert!(drain(stream).await.starts_with("__EMOTION__calm__"));
    assert!(h.store.get_all_threads().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_low_complexity_uses_fast_tier() {
    let h = harness(
        FakeModelFactory::new()
            .with_client(recursion_client("p"))
            .with_client(FakeModelClient::answering("f", "[EMOTION: normal] quick")),
    )
    .await;

    let mut req = ChatRequest::new("hello");
    req.complexity = "low".to_string();
    assert_eq!(drain(h.service.stream_chat(req).await).await, "__EMOTION__normal__quick");
    assert_eq!(h.factory.client("p").unwrap().stream_calls(), 0);
}

#[tokio::test]
async fn test_consumer_disconnect_releases_upstream() {
    let client = FakeModelClient::new("p").with_stream(vec![
        FakeStep::token("[EMOTION: calm] This is the start of a long answer"),
        FakeStep::Hang,
    ]);
    let probe = client.probe();
    let h = harness(FakeModelFactory::new().with_client(client)).await;

    let mut stream = h.service.stream_chat(ChatRequest::new("explain monads")).await;
    let thread_id = stream.thread_id.clone().unwrap();
    let first = stream.segments.recv().await.unwrap();
    assert!(first.starts_with("__EMOTION__calm__"));
    drop(stream);

    for _ in 0..200 {
        if probe.opened() == 1 && probe.all_released() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(probe.all_released());

    let pulls = probe.pulls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.pulls(), pulls);

    // Only the user turn; a cancelled reply is not persisted
    let stored = h.store.get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
}

#[tokio::test]
async fn test_upstream_error_mid_stream() {
    let client = FakeModelClient::new("p").with_stream(vec![
        FakeStep::token("[EMOTION: excited] Here is a partial answer"),
        FakeStep::Fail(LlmError::Stream("connection reset".to_string())),
    ]);
    let h = harness(FakeModelFactory::new().with_client(client)).await;

    let stream = h.service.stream_chat(ChatRequest::new("derive this")).await;
    let thread_id = stream.thread_id.clone().unwrap();
    let out = drain(stream).await;

    assert!(out.starts_with("__EMOTION__excited__Here is a partial answer"));
    assert!(out.ends_with(" [Study Engine Error: stream interrupted: connection reset]"));
    assert_eq!(out.matches("__EMOTION__").count(), 1);
    assert_eq!(h.store.get_thread_messages(&thread_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_upstream_error_before_lookahead() {
    let client = FakeModelClient::new("p").with_stream(vec![
        FakeStep::token("[EMOTION: calm] Hi"),
        FakeStep::Fail(LlmError::Stream("reset".to_string())),
    ]);
    let h = harness(FakeModelFactory::new().with_client(client)).await;

    let out = drain(h.service.stream_chat(ChatRequest::new("hi")).await).await;
    assert_eq!(out, "__EMOTION__calm__Hi [Study Engine Error: stream interrupted: reset]");
}

#[tokio::test]
async fn test_exhausted_tiers_stream_sad_marker() {
    let h = harness(FakeModelFactory::new().with_broken("p").with_broken("f")).await;

    let out = drain(h.service.stream_chat(ChatRequest::new("what is recursion")).await).await;
    assert!(out.starts_with("__EMOTION__sad__Network error: Unable to reach the AI model."));
}

#[tokio::test]
async fn test_non_transient_failure_streams_connection_error() {
    let client = FakeModelClient::failing(
        "p",
        LlmError::Http {
            status: "401 Unauthorized".to_string(),
            message: "Invalid API Key".to_string(),
        },
    );
    let h = harness(FakeModelFactory::new().with_client(client)).await;

    let out = drain(h.service.stream_chat(ChatRequest::new("hello")).await).await;
    assert_eq!(out, "__EMOTION__sad__Connection error. Please try again in a moment.");
}

#[tokio::test]
async fn test_respond_non_streaming() {
    let client = FakeModelClient::new("p")
        .with_invoke(Ok("[EMOTION: excited]  Found it: base case first.".to_string()));
    let h = harness(FakeModelFactory::new().with_client(client)).await;

    let reply = h.service.respond(ChatRequest::new("find the bug")).await;
    assert_eq!(reply.emotion, Emotion::Excited);
    assert_eq!(reply.text, "Found it: base case first.");

    let thread_id = reply.thread_id.unwrap();
    let stored = h.store.get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored[1].content, "Found it: base case first.");
}

#[tokio::test]
async fn test_disconnect_while_upstream_is_opening() {
    let client = FakeModelClient::new("p").with_stalled_open();
    let upstream = client.probe();
    let h = harness(FakeModelFactory::new().with_client(client)).await;

    let stream = h.service.stream_chat(ChatRequest::new("explain monads")).await;
    for _ in 0..200 {
        if upstream.opened() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(upstream.opened(), 1);
    assert!(!upstream.all_released());

    drop(stream);
    for _ in 0..200 {
        if upstream.all_released() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(upstream.all_released());
}

/// Store whose every operation fails
struct UnavailableStore;

fn unavailable() -> StoreError {
    StoreError::Corrupt("database is unavailable".to_string())
}

#[async_trait]
impl ConversationStore for UnavailableStore {
    async fn create_thread(&self, _title: &str) -> StoreResult<String> {
        Err(unavailable())
    }

    async fn store_message(&self, _thread_id: &str, _role: Role, _content: &str) -> StoreResult<()> {
        Err(unavailable())
    }

    async fn get_recent_history(&self, _thread_id: &str, _limit: usize) -> StoreResult<Vec<ChatMessage>> {
        Err(unavailable())
    }

    async fn get_all_threads(&self) -> StoreResult<Vec<ConversationThread>> {
        Err(unavailable())
    }

    async fn get_thread(&self, _thread_id: &str) -> StoreResult<Option<ConversationThread>> {
        Err(unavailable())
    }

    async fn get_thread_messages(&self, _thread_id: &str) -> StoreResult<Vec<StoredMessage>> {
        Err(unavailable())
    }

    async fn rename_thread(&self, _thread_id: &str, _title: &str) -> StoreResult<bool> {
        Err(unavailable())
    }

    async fn delete_thread(&self, _thread_id: &str) -> StoreResult<()> {
        Err(unavailable())
    }
}

#[tokio::test]
async fn test_store_failures_do_not_block_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(
        FakeModelFactory::new().with_client(
            recursion_client("p").with_invoke(Ok("[EMOTION: calm] Recursion is self-reference.".to_string())),
        ),
    );
    let service = service_with(factory.clone(), Arc::new(UnavailableStore), &dir);

    // New conversation: thread creation fails
    let stream = service.stream_chat(ChatRequest::new("what is recursion")).await;
    assert!(stream.thread_id.is_none());
    assert_eq!(
        drain(stream).await,
        "__EMOTION__calm__Recursion is when a function calls itself."
    );

    // Existing thread: history, user turn and reply writes all fail
    let mut req = ChatRequest::new("what is recursion");
    req.thread_id = Some("thread-1".to_string());
    let stream = service.stream_chat(req.clone()).await;
    assert_eq!(stream.thread_id.as_deref(), Some("thread-1"));
    assert_eq!(
        drain(stream).await,
        "__EMOTION__calm__Recursion is when a function calls itself."
    );
    assert_eq!(factory.client("p").unwrap().last_messages().len(), 2);

    let reply = service.respond(req).await;
    assert_eq!(reply.emotion, Emotion::Calm);
    assert_eq!(reply.text, "Recursion is self-reference.");
}
