//! HTTP surface tests through the router, without a socket

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use cypher_common::config::{CypherConfig, TierSettings};
use cypher_common::llm::{FakeModelClient, FakeModelFactory, FakeStep, StreamProbe};
use cypher_common::profile::ProfileStore;
use cypher_common::store::{ConversationStore, SqliteConversationStore, StoreLocation};
use cypher_common::types::Role;
use cypherd::routes::THREAD_ID_HEADER;
use cypherd::server::{router, AppState};
use http_body_util::BodyExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn config() -> CypherConfig {
    CypherConfig {
        tiers: TierSettings {
            primary: vec!["p".to_string()],
            fast: vec!["f".to_string()],
            ..TierSettings::default()
        },
        ..CypherConfig::default()
    }
}

async fn app_with(factory: FakeModelFactory, static_dir: Option<&Path>) -> (Router, Arc<SqliteConversationStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteConversationStore::open(StoreLocation::InMemory)
            .await
            .unwrap(),
    );
    let profile = Arc::new(ProfileStore::new(dir.path().join("memory.json")));
    let state = AppState::new(&config(), Arc::new(factory), store.clone(), profile).unwrap();
    (router(state, static_dir), store, dir)
}

async fn app() -> (Router, Arc<SqliteConversationStore>, TempDir) {
    let factory = FakeModelFactory::new()
        .with_client(FakeModelClient::answering("p", "[EMOTION: calm] Recursion is a function calling itself."))
        .with_client(FakeModelClient::answering("f", "[EMOTION: normal] Quick answer."));
    app_with(factory, None).await
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_chat_stream_returns_wire_text_and_thread_header() {
    let (app, store, _dir) = app().await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/chat_stream",
            serde_json::json!({"message": "what is recursion"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let thread_id = response.headers()[THREAD_ID_HEADER].to_str().unwrap().to_string();

    let text = body_text(response).await;
    assert_eq!(text, "__EMOTION__calm__Recursion is a function calling itself.");

    let stored = store.get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_chat_stream_rejects_empty_message() {
    let (app, store, _dir) = app().await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/chat_stream",
            serde_json::json!({"message": "   "}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.get_all_threads().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_stream_rejects_thread_id_unfit_for_header() {
    let (app, store, _dir) = app().await;
    store.create_thread("Existing").await.unwrap();

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/chat_stream",
            serde_json::json!({"message": "what is recursion", "thread_id": "bad\nid"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("thread_id"));

    // Rejected before anything was stored
    let threads = store.get_all_threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert!(store.get_thread_messages(&threads[0].id).await.unwrap().is_empty());
    assert!(store.get_thread_messages("bad\nid").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_json_fast_tier() {
    let (app, _store, _dir) = app().await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/chat",
            serde_json::json!({"message": "hi", "complexity": "low", "is_temp": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["emotion"], "normal");
    assert_eq!(json["text"], "Quick answer.");
    assert!(json["thread_id"].is_null());
}

#[tokio::test]
async fn test_thread_lifecycle() {
    let (app, store, _dir) = app().await;
    let id = store.create_thread("Old title").await.unwrap();
    store.store_message(&id, Role::User, "hello").await.unwrap();

    let response = app.clone().oneshot(get("/threads")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let threads = body_json(response).await;
    assert_eq!(threads[0]["_id"], id.as_str());
    assert_eq!(threads[0]["title"], "Old title");

    let response = app
        .clone()
        .oneshot(get(&format!("/threads/{}", id)))
        .await
        .unwrap();
    let messages = body_json(response).await;
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[0]["role"], "user");

    let response = app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/threads/{}", id),
            serde_json::json!({"title": "New title"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "success");
    assert_eq!(store.get_thread(&id).await.unwrap().unwrap().title, "New title");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/threads/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await, serde_json::json!({"status": "deleted"}));
    assert!(store.get_thread(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_thread_is_404() {
    let (app, _store, _dir) = app().await;

    let response = app.clone().oneshot(get("/threads/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request(
            Method::PATCH,
            "/threads/missing",
            serde_json::json!({"title": "x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_info_lookup() {
    let (app, _store, _dir) = app().await;

    let response = app
        .clone()
        .oneshot(get("/info?query=library%20hours"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["answer"], "Open 8 AM to 10 PM daily.");

    let response = app.oneshot(get("/info?query=parking")).await.unwrap();
    assert_eq!(
        body_json(response).await["answer"],
        "Specific data not found in university database."
    );
}

#[tokio::test]
async fn test_health() {
    let (app, _store, _dir) = app().await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_static_frontend() {
    let site = tempfile::tempdir().unwrap();
    std::fs::write(site.path().join("index.html"), "<h1>CYPHER</h1>").unwrap();
    let (app, _store, _dir) = app_with(FakeModelFactory::new(), Some(site.path())).await;

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<h1>CYPHER</h1>");

    // API routes still win over the fallback
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_dropped_response_body_releases_upstream() {
    let client = FakeModelClient::new("p").with_stream(vec![
        FakeStep::token("[EMOTION: calm] A long enough opening for the lookahead"),
        FakeStep::Hang,
    ]);
    let probe: StreamProbe = client.probe();
    let (app, _store, _dir) = app_with(FakeModelFactory::new().with_client(client), None).await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/chat_stream",
            serde_json::json!({"message": "explain closures", "is_temp": true}),
        ))
        .await
        .unwrap();

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let first = frame.into_data().unwrap();
    assert!(first.starts_with(b"__EMOTION__calm__"));
    drop(body);

    for _ in 0..200 {
        if probe.opened() == 1 && probe.all_released() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(probe.all_released());
}
