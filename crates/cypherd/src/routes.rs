//! API routes for cypherd

use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
pub use cypher_common::api::THREAD_ID_HEADER;
use cypher_common::api::{
    ChatReply, ChatRequest, HealthResponse, InfoResponse, StatusResponse, ThreadUpdate,
};
use cypher_common::tools::lookup_info;
use cypher_common::types::{ConversationThread, StoredMessage};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    error!("  Request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Thread not found".to_string())
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, message.to_string())
}

fn validate(req: &ChatRequest) -> Result<(), ApiError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    // The thread id is echoed back in a header
    if let Some(id) = &req.thread_id {
        HeaderValue::from_str(id).map_err(|_| bad_request("thread_id contains invalid characters"))?;
    }
    Ok(())
}

// ============================================================================
// Chat Routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/chat_stream", post(chat_stream))
        .route("/chat", post(chat))
}

async fn chat_stream(
    State(state): State<AppStateArc>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    validate(&req)?;
    info!("  Chat stream (tier hint: {}, temp: {})", req.complexity, req.is_temp);

    let stream = state.chat.stream_chat(req).await;
    let body = Body::from_stream(
        ReceiverStream::new(stream.segments).map(Ok::<_, Infallible>),
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache");
    if let Some(value) = stream
        .thread_id
        .as_deref()
        .and_then(|id| HeaderValue::from_str(id).ok())
    {
        builder = builder.header(THREAD_ID_HEADER, value);
    }
    builder.body(body).map_err(internal)
}

async fn chat(
    State(state): State<AppStateArc>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    validate(&req)?;
    info!("  Chat (tier hint: {}, temp: {})", req.complexity, req.is_temp);
    Ok(Json(state.chat.respond(req).await))
}

// ============================================================================
// Thread Routes
// ============================================================================

fn status_body(status: &str) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: status.to_string(),
    })
}

pub fn thread_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/threads", get(list_threads))
        .route(
            "/threads/:id",
            get(thread_history).patch(rename_thread).delete(delete_thread),
        )
}

async fn list_threads(
    State(state): State<AppStateArc>,
) -> Result<Json<Vec<ConversationThread>>, ApiError> {
    state.store.get_all_threads().await.map(Json).map_err(internal)
}

async fn thread_history(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    if state.store.get_thread(&id).await.map_err(internal)?.is_none() {
        return Err(not_found());
    }
    state
        .store
        .get_thread_messages(&id)
        .await
        .map(Json)
        .map_err(internal)
}

async fn rename_thread(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    Json(update): Json<ThreadUpdate>,
) -> Result<Json<StatusResponse>, ApiError> {
    let renamed = state
        .store
        .rename_thread(&id, &update.title)
        .await
        .map_err(internal)?;
    if !renamed {
        return Err(not_found());
    }
    info!("  Renamed thread {}", id);
    Ok(status_body("success"))
}

async fn delete_thread(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.store.delete_thread(&id).await.map_err(internal)?;
    info!("  Deleted thread {}", id);
    Ok(status_body("deleted"))
}

// ============================================================================
// Info Routes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InfoQuery {
    #[serde(default)]
    pub query: String,
}

pub fn info_routes() -> Router<AppStateArc> {
    Router::new().route("/info", get(info_lookup))
}

async fn info_lookup(Query(q): Query<InfoQuery>) -> Json<InfoResponse> {
    Json(InfoResponse {
        answer: lookup_info(&q.query).to_string(),
    })
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
