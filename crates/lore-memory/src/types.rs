//! Memory record types.
//!
//! - [`MemoryId`]: stable record identity
//! - [`MemoryCategory`]: informational tag, also selects decay eligibility
//! - [`InsertionPolicy`]: how a record enters prompts, and how that changes
//!   after it has been used
//! - [`MemoryRecord`]: the record itself

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// ID Types
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Category
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of knowledge a record holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryCategory {
    General,
    WorldFact,
    WebResearch,
    SessionSummary,
    Goal,
    Custom(String),
}

impl MemoryCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::General => "general",
            Self::WorldFact => "world_fact",
            Self::WebResearch => "web_research",
            Self::SessionSummary => "session_summary",
            Self::Goal => "goal",
            Self::Custom(name) => name,
        }
    }

    /// Parse a category name; unknown names become [`MemoryCategory::Custom`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "general" => Self::General,
            "world_fact" => Self::WorldFact,
            "web_research" => Self::WebResearch,
            "session_summary" => Self::SessionSummary,
            "goal" => Self::Goal,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for MemoryCategory {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<MemoryCategory> for String {
    fn from(category: MemoryCategory) -> Self {
        category.as_str().to_string()
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Insertion Policy
// ─────────────────────────────────────────────────────────────────────────────

/// How a record is selected for prompts.
///
/// ```text
/// Natural       --(used)--> Trigger   (removed instead if priority is 0)
/// NaturalForced --(used)--> Trigger
/// Trigger       --(used)--> Trigger
/// Disabled: entered and left only through explicit configuration
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPolicy {
    /// Retrieved on demand through similarity or keywords.
    Trigger,
    /// Surfaced unprompted once when relevant, then demoted to `Trigger`.
    Natural,
    /// Like `Natural`, but wins unconditionally after waiting long enough.
    NaturalForced,
    /// Never selected.
    Disabled,
}

impl InsertionPolicy {
    /// Policy a record moves to after it was inserted into a prompt.
    pub fn after_use(self) -> Self {
        match self {
            Self::Natural | Self::NaturalForced | Self::Trigger => Self::Trigger,
            Self::Disabled => Self::Disabled,
        }
    }

    /// Natural-class records compete for the single unprompted slot.
    pub fn is_natural(self) -> bool {
        matches!(self, Self::Natural | Self::NaturalForced)
    }

    pub fn is_disabled(self) -> bool {
        self == Self::Disabled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Natural => "natural",
            Self::NaturalForced => "natural_forced",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for InsertionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Record
// ─────────────────────────────────────────────────────────────────────────────

/// Default priority for new records.
pub const DEFAULT_PRIORITY: i32 = 1;

/// A long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub category: MemoryCategory,
    pub policy: InsertionPolicy,
    pub content: String,

    /// Absent or empty means invisible to similarity search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Words or phrases that select this record when they occur in the input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Key of the thing this record was derived from, for deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,

    /// 0 means a natural record is forgotten after its first use.
    pub priority: i32,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// Selection rounds this record was evaluated but not chosen.
    #[serde(default)]
    pub turns_unused: u32,
}

impl MemoryRecord {
    pub fn new(category: MemoryCategory, policy: InsertionPolicy, content: impl Into<String>) -> Self {
        Self {
            id: MemoryId::new(),
            category,
            policy,
            content: content.into(),
            embedding: None,
            keywords: Vec::new(),
            source_key: None,
            priority: DEFAULT_PRIORITY,
            created_at: Utc::now(),
            last_triggered_at: None,
            turns_unused: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_key(mut self, key: impl Into<String>) -> Self {
        self.source_key = Some(key.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Last time this record was used, or its creation time if never used.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_triggered_at.unwrap_or(self.created_at)
    }

    /// Whether two records say the same thing.
    pub fn is_equivalent(&self, other: &MemoryRecord) -> bool {
        if let (Some(a), Some(b)) = (&self.source_key, &other.source_key)
            && a == b
        {
            return true;
        }
        normalize(&self.content) == normalize(&other.content)
    }

    /// Whether any keyword occurs as whole words in `normalized_text`, which
    /// must come from [`normalize_padded`].
    pub(crate) fn matches_keywords(&self, normalized_text: &str) -> bool {
        self.keywords.iter().any(|kw| {
            let kw = normalize(kw);
            !kw.is_empty() && normalized_text.contains(&format!(" {kw} "))
        })
    }
}

/// Lowercase, with every run of non-alphanumerics collapsed to one space.
pub(crate) fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`normalize`] with a space on both ends, for whole-word containment.
pub(crate) fn normalize_padded(text: &str) -> String {
    format!(" {} ", normalize(text))
}
