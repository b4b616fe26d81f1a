//! CYPHER daemon - study assistant chat backend

use anyhow::{bail, Context, Result};
use clap::Parser;
use cypher_common::config::{config_path, CypherConfig};
use cypherd::server::{self, AppState};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cypherd")]
#[command(about = "CYPHER study assistant daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: $CYPHER_CONFIG or ./cypher.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env first so the API key variable is visible
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let path = config_path(cli.config.as_deref());
    let mut config = CypherConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    // Initialize logging (RUST_LOG wins over the config level)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("CYPHER Daemon v{} starting", env!("CARGO_PKG_VERSION"));
    if dotenv_loaded {
        info!("  Loaded environment from .env");
    }
    if !path.exists() {
        warn!("  No config at {}, using defaults", path.display());
    }

    let Some(api_key) = config.llm.resolve_api_key() else {
        bail!(
            "{} is not set (environment, .env, or [llm] api_key)",
            config.llm.api_key_env
        );
    };

    info!(
        "  Tiers: primary {:?}, fast {:?}",
        config.tiers.primary, config.tiers.fast
    );
    let state = AppState::from_config(&config, api_key).await?;
    server::run(config, state).await
}
