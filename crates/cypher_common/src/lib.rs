//! CYPHER common library: the response pipeline, model failover and the
//! stores shared by the daemon and the CLI.

pub mod api;
pub mod config;
pub mod emotion;
pub mod llm;
pub mod pipeline;
pub mod profile;
pub mod prompts;
pub mod store;
pub mod tiers;
pub mod tools;
pub mod types;
pub mod wire;

pub use config::CypherConfig;
pub use emotion::Emotion;
pub use llm::{LlmError, ModelClient, ModelFactory, TokenStream};
pub use pipeline::{EmotionStreamFilter, PipelineEvent};
pub use profile::{ProfileContext, ProfileStore, QueryIntent};
pub use store::{ConversationStore, SqliteConversationStore, StoreError, StoreLocation};
pub use tiers::{FailoverController, FailoverError, ModelTier, TierCatalog, TierError, TierState};
pub use types::{ChatMessage, ConversationThread, Role, StoredMessage};
