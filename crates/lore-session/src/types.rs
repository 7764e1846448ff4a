//! Core types for chat history.
//!
//! - [`ChatMessage`]: one logged entry
//! - [`ChatSession`]: an ordered run of messages, current or archived
//! - [`SessionSummary`]: what summarization produces when a session is sealed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// ID Types
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Role of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// System text shown before the conversation.
    SystemPreamble,
    /// System text injected inside the conversation.
    SystemInline,
    User,
    Assistant,
}

impl MessageRole {
    /// The prompt role this message is sent with.
    pub fn prompt_role(self) -> lore_llm::Role {
        match self {
            Self::SystemPreamble | Self::SystemInline => lore_llm::Role::System,
            Self::User => lore_llm::Role::User,
            Self::Assistant => lore_llm::Role::Assistant,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemPreamble => "system_preamble",
            Self::SystemInline => "system_inline",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    /// Display name of whoever wrote it.
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Hidden messages are part of the model's context but are not shown to
    /// the user.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            author: author.into(),
            content: content.into(),
            timestamp: Utc::now(),
            hidden: false,
            note: None,
        }
    }

    pub fn user(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, author, content)
    }

    pub fn assistant(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, author, content)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// `author: content`, the form messages take in transcripts and prompts.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.author, self.content)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summaries
// ─────────────────────────────────────────────────────────────────────────────

/// Most goals a summary keeps.
pub const MAX_GOALS: usize = 5;

/// Whether a session was plain conversation or roleplay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Chat,
    Roleplay,
}

/// Summary metadata attached when a session is archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Things the user wants to do or learn; at most [`MAX_GOALS`].
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub kind: SessionKind,
    /// 1 (trivial) to 5 (life-changing).
    pub importance: u8,
}

impl SessionSummary {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            keywords: Vec::new(),
            goals: Vec::new(),
            kind: SessionKind::Chat,
            importance: 3,
        }
    }

    /// Clamp importance to 1..=5, cap goals and drop blank entries.
    pub fn normalized(mut self) -> Self {
        self.importance = self.importance.clamp(1, 5);
        self.keywords.retain(|k| !k.trim().is_empty());
        self.goals.retain(|g| !g.trim().is_empty());
        self.goals.truncate(MAX_GOALS);
        self
    }

    /// One-line form used when surfacing past sessions in a prompt.
    pub fn one_line(&self) -> String {
        format!("{}: {}", self.title, self.summary.replace('\n', " "))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered run of messages.
///
/// A session without `ended_at` is the current one; a sealed session is
/// archived and never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub messages: Vec<ChatMessage>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    /// Embedding of the summary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            messages: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            summary: None,
            embedding: None,
        }
    }

    /// Build a sealed session from already-ordered messages.
    pub fn sealed(messages: Vec<ChatMessage>) -> Self {
        let now = Utc::now();
        let started_at = messages.first().map(|m| m.timestamp).unwrap_or(now);
        let ended_at = messages.last().map(|m| m.timestamp).unwrap_or(now);
        Self {
            id: SessionId::new(),
            messages,
            started_at,
            ended_at: Some(ended_at),
            summary: None,
            embedding: None,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_archived(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Messages shown to the user.
    pub fn visible_messages(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| !m.hidden)
    }

    /// Transcript of every message, hidden ones included, one
    /// `author: content` line each.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(ChatMessage::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
