//! Model tiers and failover.
//!
//! Each tier holds an ordered list of candidate models. A shared
//! [`TierState`] remembers which candidate last worked. Rotation is
//! forward-only and never rolled back.
//!
//! Invariants:
//! - every cursor is a valid index into its tier's candidate list
//! - `open_model` makes at most `len(candidates)` build attempts per tier
//! - primary exhaustion degrades to fast once; fast never escalates

use crate::llm::{LlmError, ModelClient, ModelFactory, TokenStream};
use crate::types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Priority class of candidate models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// High quality
    Primary,
    /// Low latency
    Fast,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Primary => "primary",
            ModelTier::Fast => "fast",
        }
    }

    /// Request complexity "high" maps to primary, anything else to fast
    pub fn from_complexity(complexity: &str) -> Self {
        if complexity == "high" {
            ModelTier::Primary
        } else {
            ModelTier::Fast
        }
    }

    fn slot(&self) -> usize {
        match self {
            ModelTier::Primary => 0,
            ModelTier::Fast => 1,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TierError {
    #[error("tier '{0}' has no candidate models")]
    EmptyTier(ModelTier),

    #[error("All AI models in tier '{tier}' failed ({attempts} attempts, last: {last_error})")]
    Exhausted {
        tier: ModelTier,
        attempts: usize,
        last_error: String,
    },
}

/// Ordered candidate lists per tier
#[derive(Debug, Clone)]
pub struct TierCatalog {
    primary: Vec<String>,
    fast: Vec<String>,
}

impl TierCatalog {
    pub fn new(primary: Vec<String>, fast: Vec<String>) -> Result<Self, TierError> {
        if primary.is_empty() {
            return Err(TierError::EmptyTier(ModelTier::Primary));
        }
        if fast.is_empty() {
            return Err(TierError::EmptyTier(ModelTier::Fast));
        }
        Ok(Self { primary, fast })
    }

    pub fn candidates(&self, tier: ModelTier) -> &[String] {
        match tier {
            ModelTier::Primary => &self.primary,
            ModelTier::Fast => &self.fast,
        }
    }
}

/// Process-wide cursor per tier, guarded by a mutex
#[derive(Debug, Default)]
pub struct TierState {
    cursors: Mutex<[usize; 2]>,
}

impl TierState {
    /// Every cursor starts at the first candidate
    pub fn init() -> Self {
        Self::default()
    }

    pub fn cursor(&self, tier: ModelTier) -> usize {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)[tier.slot()]
    }

    fn set(&self, tier: ModelTier, index: usize, len: usize) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        cursors[tier.slot()] = index % len;
    }

    /// Rotate to the next candidate and return the new index
    fn advance(&self, tier: ModelTier, len: usize) -> usize {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let next = (cursors[tier.slot()] + 1) % len;
        cursors[tier.slot()] = next;
        next
    }
}

/// A ready client and where it came from
#[derive(Clone)]
pub struct OpenedModel {
    /// Tier actually used (fast when primary degraded)
    pub tier: ModelTier,
    pub model: String,
    pub client: Arc<dyn ModelClient>,
}

impl fmt::Debug for OpenedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedModel")
            .field("tier", &self.tier)
            .field("model", &self.model)
            .finish()
    }
}

/// Why a request could not be served
#[derive(Debug, Clone, thiserror::Error)]
pub enum FailoverError {
    #[error(transparent)]
    Tier(#[from] TierError),

    /// Invocation failed and the single retry (if any) failed too
    #[error("{0}")]
    Connection(LlmError),
}

/// Picks models, rotates on failure, retries a request once
pub struct FailoverController {
    catalog: TierCatalog,
    state: Arc<TierState>,
    factory: Arc<dyn ModelFactory>,
}

impl FailoverController {
    pub fn new(catalog: TierCatalog, state: Arc<TierState>, factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            catalog,
            state,
            factory,
        }
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    pub fn state(&self) -> &TierState {
        &self.state
    }

    /// Candidate at the tier's current cursor
    pub fn select_model(&self, tier: ModelTier) -> &str {
        let candidates = self.catalog.candidates(tier);
        &candidates[self.state.cursor(tier) % candidates.len()]
    }

    /// Rotate the tier to its next candidate
    pub fn report_failure(&self, tier: ModelTier) -> &str {
        let candidates = self.catalog.candidates(tier);
        let next = self.state.advance(tier, candidates.len());
        info!("Tier {} rotated to [{}]", tier, candidates[next]);
        &candidates[next]
    }

    /// Build a client for the tier, degrading primary to fast when every
    /// primary candidate fails to build
    pub fn open_model(&self, tier: ModelTier) -> Result<OpenedModel, TierError> {
        match self.open_in_tier(tier) {
            Ok(opened) => Ok(opened),
            Err(e) if tier == ModelTier::Primary => {
                warn!("Primary model unavailable ({}). Switching to fast tier.", e);
                self.open_in_tier(ModelTier::Fast)
            }
            Err(e) => Err(e),
        }
    }

    fn open_in_tier(&self, tier: ModelTier) -> Result<OpenedModel, TierError> {
        let candidates = self.catalog.candidates(tier);
        let len = candidates.len();
        let start = self.state.cursor(tier);
        let mut last_error = String::new();

        for attempt in 0..len {
            let index = (start + attempt) % len;
            let model = &candidates[index];
            match self.factory.build(model, tier) {
                Ok(client) => {
                    self.state.set(tier, index, len);
                    return Ok(OpenedModel {
                        tier,
                        model: model.clone(),
                        client,
                    });
                }
                Err(e) => {
                    warn!("Could not initialise [{}] in tier {}: {}", model, tier, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(TierError::Exhausted {
            tier,
            attempts: len,
            last_error,
        })
    }

    /// Decide whether a failed call earns its one retry, and open the model to retry on
    fn retry_target(&self, failed: &OpenedModel, error: LlmError) -> Result<OpenedModel, FailoverError> {
        if !error.is_transient() {
            warn!("[{}] failed: {}", failed.model, error);
            return Err(FailoverError::Connection(error));
        }
        warn!("[{}] transient failure, retrying once: {}", failed.model, error);
        self.report_failure(failed.tier);
        Ok(self.open_model(failed.tier)?)
    }

    /// Open a token stream, with at most one failover retry
    pub async fn stream(
        &self,
        tier: ModelTier,
        messages: &[ChatMessage],
    ) -> Result<(OpenedModel, TokenStream), FailoverError> {
        let opened = self.open_model(tier)?;
        let error = match opened.client.stream(messages).await {
            Ok(stream) => return Ok((opened, stream)),
            Err(e) => e,
        };

        let retry = self.retry_target(&opened, error)?;
        let stream = retry
            .client
            .stream(messages)
            .await
            .map_err(FailoverError::Connection)?;
        Ok((retry, stream))
    }

    /// Full completion, with at most one failover retry
    pub async fn invoke(
        &self,
        tier: ModelTier,
        messages: &[ChatMessage],
    ) -> Result<(OpenedModel, String), FailoverError> {
        let opened = self.open_model(tier)?;
        let error = match opened.client.invoke(messages).await {
            Ok(text) => return Ok((opened, text)),
            Err(e) => e,
        };

        let retry = self.retry_target(&opened, error)?;
        let text = retry
            .client
            .invoke(messages)
            .await
            .map_err(FailoverError::Connection)?;
        Ok((retry, text))
    }
}
