//! Session summarization.
//!
//! When a session is archived it is condensed into a [`SessionSummary`]
//! (title, summary, keywords, goals, kind, importance) plus an embedding of
//! the summary text so it can be found again later.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use lore_llm::{CompletionRequest, Message, SharedBackend, SharedEmbedder};

use crate::error::{Result, SessionError};
use crate::types::{ChatSession, SessionKind, SessionSummary};

/// A summary together with the embedding of its text.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedSession {
    pub summary: SessionSummary,
    pub embedding: Option<Vec<f32>>,
}

/// Produces a summary for a session about to be archived.
#[async_trait]
pub trait SessionSummarizer: Send + Sync {
    async fn summarize(&self, session: &ChatSession) -> Result<SummarizedSession>;
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Summarizer
// ─────────────────────────────────────────────────────────────────────────────

const SESSION_SUMMARY_PROMPT: &str = r#"You summarize chat sessions for a long-term memory system.

Return a JSON object with this structure:
```json
{
  "title": "short title",
  "summary": "2-4 sentences on what happened and what matters later",
  "keywords": ["..."],
  "goals": ["things the user wants to do or learn, at most 5"],
  "roleplay": false,
  "importance": 3
}
```

Rules:
- `importance` is 1 (small talk) to 5 (life-changing news)
- `roleplay` is true only if the session was fiction or a game
- Leave `goals` empty if the user expressed none"#;

/// Configuration for the LLM summarizer.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub model: String,
    pub max_summary_tokens: u32,
    /// Transcripts longer than this keep only their most recent part.
    pub max_transcript_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_summary_tokens: 512,
            // ~6k tokens ≈ 24k chars
            max_transcript_chars: 24_000,
        }
    }
}

/// Summarizes sessions through the inference backend.
pub struct LlmSummarizer {
    backend: SharedBackend,
    embedder: Option<SharedEmbedder>,
    config: SummarizerConfig,
}

impl LlmSummarizer {
    pub fn new(backend: SharedBackend, config: SummarizerConfig) -> Self {
        Self {
            backend,
            embedder: None,
            config,
        }
    }

    /// Embed summary text with this embedder.
    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn build_transcript(&self, session: &ChatSession) -> String {
        let transcript = session.transcript();
        let limit = self.config.max_transcript_chars;
        let chars = transcript.chars().count();
        if chars <= limit {
            return transcript;
        }
        transcript.chars().skip(chars - limit).collect()
    }
}

#[async_trait]
impl SessionSummarizer for LlmSummarizer {
    async fn summarize(&self, session: &ChatSession) -> Result<SummarizedSession> {
        let transcript = self.build_transcript(session);
        let request = CompletionRequest::new(
            &self.config.model,
            vec![Message::user(format!(
                "Conversation:\n\n{transcript}\n\nRespond with ONLY the JSON object. No markdown, no explanation."
            ))],
            self.config.max_summary_tokens,
        )
        .with_system(SESSION_SUMMARY_PROMPT);

        let response = self.backend.complete(request).await?;
        let summary = parse_summary(response.text())?;

        let embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(&summary.summary).await?),
            None => None,
        };

        tracing::debug!(
            session = %session.id,
            title = %summary.title,
            goals = summary.goals.len(),
            importance = summary.importance,
            "Session summarized"
        );
        Ok(SummarizedSession { summary, embedding })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    goals: Vec<String>,
    #[serde(default)]
    roleplay: bool,
    #[serde(default = "default_importance")]
    importance: i64,
}

fn default_importance() -> i64 {
    3
}

/// Parse model output into a summary.
///
/// Tolerates markdown code fences and text around the JSON object. Fails if
/// no object parses or if title or summary is empty.
pub fn parse_summary(raw: &str) -> Result<SessionSummary> {
    let cleaned = strip_code_fences(raw);

    let parsed = serde_json::from_str::<RawSummary>(cleaned).ok().or_else(|| {
        extract_json_object(cleaned).and_then(|json| serde_json::from_str(json).ok())
    });
    let Some(raw_summary) = parsed else {
        warn!("Failed to parse session summary");
        return Err(SessionError::Summary("no JSON object in model output".into()));
    };

    if raw_summary.title.trim().is_empty() || raw_summary.summary.trim().is_empty() {
        return Err(SessionError::Summary("summary is missing title or text".into()));
    }

    Ok(SessionSummary {
        title: raw_summary.title.trim().to_string(),
        summary: raw_summary.summary.trim().to_string(),
        keywords: raw_summary.keywords,
        goals: raw_summary.goals,
        kind: if raw_summary.roleplay {
            SessionKind::Roleplay
        } else {
            SessionKind::Chat
        },
        importance: raw_summary.importance.clamp(1, 5) as u8,
    }
    .normalized())
}

/// Strip markdown code fences from model output.
fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();

    if let Some(rest) = s.strip_prefix("```json")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }
    if let Some(rest) = s.strip_prefix("```")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }

    s
}

/// Try to find a top-level JSON object `{...}` in the text.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end > start {
        Some(&s[start..=end])
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
