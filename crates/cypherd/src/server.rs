//! HTTP server for cypherd

use crate::chat::ChatService;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use cypher_common::config::CypherConfig;
use cypher_common::llm::{ChatCompletionsFactory, ModelFactory};
use cypher_common::profile::ProfileStore;
use cypher_common::store::{ConversationStore, SqliteConversationStore, StoreLocation};
use cypher_common::tiers::{FailoverController, TierState};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub chat: ChatService,
    pub store: Arc<dyn ConversationStore>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the chat service from its parts
    pub fn new(
        config: &CypherConfig,
        factory: Arc<dyn ModelFactory>,
        store: Arc<dyn ConversationStore>,
        profile: Arc<ProfileStore>,
    ) -> Result<Self> {
        let catalog = config
            .tiers
            .catalog()
            .context("Invalid model tier configuration")?;
        let failover = Arc::new(FailoverController::new(
            catalog,
            Arc::new(TierState::init()),
            factory,
        ));
        let chat = ChatService::new(
            failover,
            Arc::clone(&store),
            profile,
            config.stream.clone(),
        );

        Ok(Self {
            chat,
            store,
            start_time: Instant::now(),
        })
    }

    /// Production state: Groq-compatible upstream, SQLite store, JSON profile
    pub async fn from_config(config: &CypherConfig, api_key: String) -> Result<Self> {
        let factory = Arc::new(ChatCompletionsFactory::new(
            config.llm.clone(),
            Some(api_key),
            config.tiers.clone(),
        ));
        let store = SqliteConversationStore::open(StoreLocation::Custom(config.store.database.clone()))
            .await
            .context("Failed to open conversation database")?;
        let profile = Arc::new(ProfileStore::new(config.profile.path.clone()));
        info!("  Profile: {}", profile.path().display());

        Self::new(config, factory, Arc::new(store), profile)
    }
}

/// Build the router (static files served at `/` when a directory is given)
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .merge(routes::chat_routes())
        .merge(routes::thread_routes())
        .merge(routes::info_routes())
        .merge(routes::health_routes())
        .with_state(Arc::new(state));

    let app = match static_dir {
        Some(dir) => {
            info!("  Serving frontend from {}", dir.display());
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        None => app,
    };

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until ctrl-c
pub async fn run(config: CypherConfig, state: AppState) -> Result<()> {
    let app = router(state, config.server.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("  Listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("  Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("  Shutdown requested");
}
