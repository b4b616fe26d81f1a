//! Long-term profile and personality document (`memory.json`).
//!
//! The file is created with defaults on first access. A missing or corrupt
//! file never fails a read; it reads as the defaults. Writes go through one
//! lock and land atomically (temp file, then rename).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("profile {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode profile: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the user told us (or what we assume) about them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_name")]
    pub profession: String,
    #[serde(default = "default_goals")]
    pub goals: Vec<String>,
    #[serde(default = "default_level")]
    pub coding_level: String,
    #[serde(default = "default_topics")]
    pub frequent_topics: Vec<String>,
    #[serde(default = "default_preferences")]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub behavior_patterns: Vec<String>,
    #[serde(default)]
    pub repeated_mistakes: Vec<String>,
    /// Keys this version does not know about, kept across rewrites
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_name() -> String {
    "Student".to_string()
}

fn default_level() -> String {
    "Intermediate".to_string()
}

fn default_goals() -> Vec<String> {
    vec![
        "Learn effectively".to_string(),
        "Understand concepts deeply".to_string(),
        "Excel academically".to_string(),
    ]
}

fn default_topics() -> Vec<String> {
    vec![
        "Mathematics".to_string(),
        "Computer Science".to_string(),
        "Physics".to_string(),
    ]
}

fn default_preferences() -> Vec<String> {
    vec![
        "Clear explanations".to_string(),
        "Examples".to_string(),
        "Step-by-step breakdown".to_string(),
    ]
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: default_name(),
            profession: default_name(),
            goals: default_goals(),
            coding_level: default_level(),
            frequent_topics: default_topics(),
            preferences: default_preferences(),
            behavior_patterns: Vec::new(),
            repeated_mistakes: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Assistant-side state that evolves with use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_mood")]
    pub mood: String,
    #[serde(default)]
    pub user_familiarity: u64,
    #[serde(default)]
    pub trust_level: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_tone() -> String {
    "helpful-intelligent".to_string()
}

fn default_mood() -> String {
    "neutral".to_string()
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            mood: default_mood(),
            user_familiarity: 0,
            trust_level: 0,
            extra: Map::new(),
        }
    }
}

/// The whole `memory.json` document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default)]
    pub user_profile: UserProfile,
    #[serde(default)]
    pub personality: Personality,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Slice of the document the prompt builder needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileContext {
    pub name: String,
    pub level: String,
    pub frequent_topics: Vec<String>,
    pub goals: Vec<String>,
    pub familiarity: u64,
    pub mood: String,
}

impl From<&ProfileDocument> for ProfileContext {
    fn from(doc: &ProfileDocument) -> Self {
        Self {
            name: doc.user_profile.name.clone(),
            level: doc.user_profile.coding_level.clone(),
            frequent_topics: doc.user_profile.frequent_topics.clone(),
            goals: doc.user_profile.goals.clone(),
            familiarity: doc.personality.user_familiarity,
            mood: doc.personality.mood.clone(),
        }
    }
}

impl Default for ProfileContext {
    fn default() -> Self {
        Self::from(&ProfileDocument::default())
    }
}

/// Coarse category of a user message, stored as the personality mood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    ConceptQuery,
    ProblemQuery,
    ComparisonQuery,
    DebugQuery,
    SummaryQuery,
    GeneralQuery,
}

/// Keyword table, checked in order; first hit wins
const INTENT_KEYWORDS: &[(QueryIntent, &[&str])] = &[
    (
        QueryIntent::ConceptQuery,
        &[
            "what is",
            "what are",
            "explain",
            "define",
            "describe",
            "how does",
            "why does",
            "tell me about",
        ],
    ),
    (
        QueryIntent::ProblemQuery,
        &["solve", "calculate", "find", "compute", "evaluate", "prove", "derive"],
    ),
    (
        QueryIntent::ComparisonQuery,
        &["difference", "compare", "versus", "vs", "which is better", "contrast"],
    ),
    (
        QueryIntent::DebugQuery,
        &["error", "not working", "stuck", "failed", "bug", "crash", "fix", "wrong"],
    ),
    (
        QueryIntent::SummaryQuery,
        &["summarize", "summary", "tldr", "short", "brief"],
    ),
];

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::ConceptQuery => "concept_query",
            QueryIntent::ProblemQuery => "problem_query",
            QueryIntent::ComparisonQuery => "comparison_query",
            QueryIntent::DebugQuery => "debug_query",
            QueryIntent::SummaryQuery => "summary_query",
            QueryIntent::GeneralQuery => "general_query",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a message by substring keywords on its lowercased text
pub fn classify_intent(message: &str) -> QueryIntent {
    let lower = message.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(intent, _)| *intent)
        .unwrap_or(QueryIntent::GeneralQuery)
}

/// File-backed profile store
pub struct ProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document; defaults when the file is missing or unreadable
    pub async fn load(&self) -> ProfileDocument {
        if let Err(e) = self.ensure_file().await {
            warn!("Could not create profile file: {}", e);
        }
        match self.read().await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Using default profile: {}", e);
                ProfileDocument::default()
            }
        }
    }

    pub async fn get_context(&self) -> ProfileContext {
        ProfileContext::from(&self.load().await)
    }

    /// Bump the interaction counter, returning the new value
    pub async fn increment_familiarity(&self) -> Result<u64, ProfileError> {
        let doc = self
            .update(|doc| doc.personality.user_familiarity += 1)
            .await?;
        Ok(doc.personality.user_familiarity)
    }

    pub async fn set_mood(&self, intent: QueryIntent) -> Result<(), ProfileError> {
        self.update(|doc| doc.personality.mood = intent.as_str().to_string())
            .await?;
        Ok(())
    }

    /// Read-modify-write under the store lock.
    ///
    /// A corrupt file is left untouched and reported.
    pub async fn update<F>(&self, apply: F) -> Result<ProfileDocument, ProfileError>
    where
        F: FnOnce(&mut ProfileDocument),
    {
        let _guard = self.write_lock.lock().await;

        let mut doc = match tokio::fs::try_exists(&self.path).await {
            Ok(true) => self.read().await?,
            _ => ProfileDocument::default(),
        };
        apply(&mut doc);
        self.write(&doc).await?;
        Ok(doc)
    }

    async fn ensure_file(&self) -> Result<(), ProfileError> {
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        debug!("Creating profile at {}", self.path.display());
        self.write(&ProfileDocument::default()).await
    }

    async fn read(&self) -> Result<ProfileDocument, ProfileError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        serde_json::from_str(&content).map_err(|source| ProfileError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write(&self, doc: &ProfileDocument) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> ProfileError {
        ProfileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
