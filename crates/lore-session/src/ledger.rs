//! The per-persona session ledger.
//!
//! Exactly one session is current; every other session is archived. Ending a
//! session either archives it (summarize, then seal) or, for sessions too
//! short to be worth remembering, clears it in place.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};
use crate::summarizer::{SessionSummarizer, SummarizedSession};
use crate::types::{ChatMessage, ChatSession, MessageId, SessionId, SessionSummary};

/// Version written into persisted ledger documents.
const LEDGER_VERSION: u32 = 1;

/// Session lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Sessions with at most this many messages are cleared, not archived.
    pub min_messages_to_archive: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_messages_to_archive: 2,
        }
    }
}

/// What [`SessionLedger::start_new_session`] did with the old session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionTransition {
    /// Summarized and sealed into the archive.
    Archived {
        session_id: SessionId,
        summary: SessionSummary,
        embedding: Option<Vec<f32>>,
    },
    /// Emptied in place without summarization.
    Cleared { discarded: usize },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    current: ChatSession,
    #[serde(default)]
    archived: Vec<ChatSession>,
}

/// Ordered chat sessions for one persona.
#[derive(Debug)]
pub struct SessionLedger {
    current: ChatSession,
    archived: Vec<ChatSession>,
    config: LedgerConfig,
}

impl SessionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            current: ChatSession::new(),
            archived: Vec::new(),
            config,
        }
    }

    pub fn current(&self) -> &ChatSession {
        &self.current
    }

    /// Archived sessions, oldest first.
    pub fn archived(&self) -> &[ChatSession] {
        &self.archived
    }

    /// All sessions, oldest first; the current session is last.
    pub fn sessions(&self) -> impl DoubleEndedIterator<Item = &ChatSession> {
        self.archived.iter().chain(std::iter::once(&self.current))
    }

    /// Total messages across every session.
    pub fn message_count(&self) -> usize {
        self.sessions().map(ChatSession::len).sum()
    }

    /// Messages logged strictly after `since`, across every session.
    pub fn messages_since(&self, since: DateTime<Utc>) -> usize {
        self.sessions()
            .flat_map(|s| s.messages.iter())
            .filter(|m| m.timestamp > since)
            .count()
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Append a message to the current session.
    ///
    /// Messages are kept in append order regardless of their timestamps.
    pub fn log_message(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id;
        tracing::trace!(%id, role = %message.role, "Logged message");
        self.current.messages.push(message);
        id
    }

    /// Remove and return the most recent message of the current session.
    pub fn remove_last(&mut self) -> Option<ChatMessage> {
        self.current.messages.pop()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// End the current session and start a new one.
    ///
    /// With `archive_previous` and more than `min_messages_to_archive`
    /// messages, the session is summarized and sealed into the archive.
    /// Otherwise it is cleared in place and the summarizer is not called.
    /// If summarization fails or is cancelled the ledger is unchanged.
    pub async fn start_new_session(
        &mut self,
        archive_previous: bool,
        summarizer: &dyn SessionSummarizer,
        cancel: &CancellationToken,
    ) -> Result<SessionTransition> {
        if !archive_previous || self.current.len() <= self.config.min_messages_to_archive {
            let discarded = self.current.len();
            self.current.messages.clear();
            self.current.started_at = Utc::now();
            tracing::info!(session = %self.current.id, discarded, "Session cleared");
            return Ok(SessionTransition::Cleared { discarded });
        }

        let SummarizedSession { summary, embedding } = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = summarizer.summarize(&self.current) => result?,
        };

        let mut sealed = std::mem::take(&mut self.current);
        sealed.ended_at = Some(
            sealed
                .messages
                .last()
                .map(|m| m.timestamp)
                .unwrap_or_else(Utc::now),
        );
        sealed.summary = Some(summary.clone());
        sealed.embedding = embedding.clone();
        let session_id = sealed.id;

        tracing::info!(
            session = %session_id,
            messages = sealed.len(),
            title = %summary.title,
            "Session archived"
        );
        self.archived.push(sealed);

        Ok(SessionTransition::Archived {
            session_id,
            summary,
            embedding,
        })
    }

    /// Replace the archive with sessions built from imported segments.
    ///
    /// The current session is untouched. Returns the number of sessions.
    pub fn import_segments(&mut self, segments: Vec<Vec<ChatMessage>>) -> usize {
        self.archived = segments
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(ChatSession::sealed)
            .collect();
        tracing::info!(sessions = self.archived.len(), "Imported archived sessions");
        self.archived.len()
    }

    /// Summarize up to `max` archived sessions that have no summary yet,
    /// oldest first. Stops at the first failure.
    pub async fn summarize_archived(
        &mut self,
        summarizer: &dyn SessionSummarizer,
        cancel: &CancellationToken,
        max: usize,
    ) -> Result<usize> {
        let mut done = 0;
        for session in self
            .archived
            .iter_mut()
            .filter(|s| s.summary.is_none() && !s.is_empty())
            .take(max)
        {
            let SummarizedSession { summary, embedding } = tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                result = summarizer.summarize(session) => result?,
            };
            session.summary = Some(summary);
            session.embedding = embedding;
            done += 1;
        }
        if done > 0 {
            tracing::debug!(done, "Backfilled archived session summaries");
        }
        Ok(done)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Load a ledger from disk. Missing or corrupt files yield a fresh ledger.
    pub fn load(path: &Path, config: LedgerConfig) -> Self {
        let doc: LedgerDocument = lore_types::load_json_or_default(path);
        if doc.version > LEDGER_VERSION {
            tracing::warn!(
                path = %path.display(),
                version = doc.version,
                supported = LEDGER_VERSION,
                "Session file was written by a newer version"
            );
        }
        Self {
            current: doc.current,
            archived: doc.archived,
            config,
        }
    }

    /// Persist the ledger. A failed save is logged and returned.
    pub fn save(&self, path: &Path, backup: bool) -> Result<()> {
        let doc = LedgerDocument {
            version: LEDGER_VERSION,
            current: self.current.clone(),
            archived: self.archived.clone(),
        };
        lore_types::save_json(path, &doc, backup).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to save sessions");
            SessionError::from(e)
        })
    }
}

impl Default for SessionLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::{LlmSummarizer, SummarizerConfig};
    use async_trait::async_trait;
    use lore_llm::{MockBackend, MockEmbedder};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const SUMMARY_JSON: &str = r#"{"title":"Evening chat","summary":"Sam talked about their garden.","keywords":["garden"],"goals":["grow tomatoes"],"roleplay":false,"importance":2}"#;

    /// Counts calls and returns a fixed summary.
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    impl CountingSummarizer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionSummarizer for CountingSummarizer {
        async fn summarize(&self, _session: &ChatSession) -> Result<SummarizedSession> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SummarizedSession {
                summary: SessionSummary::new("t", "s"),
                embedding: Some(vec![1.0]),
            })
        }
    }

    fn ledger_with(n: usize) -> SessionLedger {
        let mut ledger = SessionLedger::default();
        for i in 0..n {
            ledger.log_message(ChatMessage::user("Sam", format!("message {i}")));
        }
        ledger
    }

    #[tokio::test]
    async fn test_short_session_cleared_without_summary() {
        let mut ledger = ledger_with(1);
        let summarizer = CountingSummarizer::new();
        let id_before = ledger.current().id;

        let transition = ledger
            .start_new_session(true, &summarizer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transition, SessionTransition::Cleared { discarded: 1 });
        assert!(ledger.archived().is_empty());
        assert!(ledger.current().is_empty());
        assert_eq!(ledger.current().id, id_before);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_long_session_archived_with_summary() {
        let mut ledger = ledger_with(50);
        let summarizer = LlmSummarizer::new(
            Arc::new(MockBackend::with_text(SUMMARY_JSON)),
            SummarizerConfig::default(),
        )
        .with_embedder(Arc::new(MockEmbedder::default()));
        let old_id = ledger.current().id;

        let transition = ledger
            .start_new_session(true, &summarizer, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(transition, SessionTransition::Archived { session_id, .. } if session_id == old_id));
        assert_eq!(ledger.archived().len(), 1);
        let archived = &ledger.archived()[0];
        assert_eq!(archived.len(), 50);
        assert!(archived.is_archived());
        let summary = archived.summary.as_ref().unwrap();
        assert!(!summary.title.is_empty());
        assert!(!summary.summary.is_empty());
        assert!(archived.embedding.as_ref().is_some_and(|e| !e.is_empty()));

        assert!(ledger.current().is_empty());
        assert_ne!(ledger.current().id, old_id);
    }

    #[tokio::test]
    async fn test_archive_disabled_clears() {
        let mut ledger = ledger_with(10);
        let summarizer = CountingSummarizer::new();

        let transition = ledger
            .start_new_session(false, &summarizer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transition, SessionTransition::Cleared { discarded: 10 });
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summary_failure_leaves_session() {
        let mut ledger = ledger_with(10);
        let summarizer = LlmSummarizer::new(
            Arc::new(MockBackend::with_text("not json")),
            SummarizerConfig::default(),
        );

        let result = ledger
            .start_new_session(true, &summarizer, &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(ledger.current().len(), 10);
        assert!(ledger.archived().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_summary_leaves_session() {
        let mut ledger = ledger_with(10);
        let summarizer = LlmSummarizer::new(
            Arc::new(MockBackend::with_text(SUMMARY_JSON).with_delay(Duration::from_secs(60))),
            SummarizerConfig::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = ledger.start_new_session(true, &summarizer, &cancel).await;

        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert_eq!(ledger.current().len(), 10);
        assert!(ledger.archived().is_empty());
    }

    #[test]
    fn test_remove_last() {
        let mut ledger = ledger_with(2);
        let removed = ledger.remove_last().unwrap();
        assert_eq!(removed.content, "message 1");
        assert_eq!(ledger.current().len(), 1);
        ledger.remove_last();
        assert!(ledger.remove_last().is_none());
    }

    #[test]
    fn test_log_message_keeps_append_order() {
        let mut ledger = SessionLedger::default();
        let now = Utc::now();
        ledger.log_message(ChatMessage::user("Sam", "later").with_timestamp(now));
        ledger.log_message(
            ChatMessage::user("Sam", "earlier").with_timestamp(now - chrono::Duration::hours(1)),
        );

        let contents: Vec<_> = ledger.current().messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["later", "earlier"]);
    }

    #[test]
    fn test_import_segments_replaces_archive() {
        let mut ledger = ledger_with(3);
        let segments = vec![
            vec![ChatMessage::user("Sam", "a"), ChatMessage::user("Sam", "b")],
            vec![],
            vec![ChatMessage::user("Sam", "c")],
        ];

        assert_eq!(ledger.import_segments(segments), 2);
        assert_eq!(ledger.archived().len(), 2);
        assert!(ledger.archived().iter().all(ChatSession::is_archived));
        assert_eq!(ledger.current().len(), 3);
        assert_eq!(ledger.message_count(), 6);
        let order: Vec<_> = ledger.sessions().map(ChatSession::len).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_summarize_archived_backfills() {
        let mut ledger = SessionLedger::default();
        ledger.import_segments(vec![
            vec![ChatMessage::user("Sam", "a")],
            vec![ChatMessage::user("Sam", "b")],
            vec![ChatMessage::user("Sam", "c")],
        ]);
        let summarizer = CountingSummarizer::new();

        let done = ledger
            .summarize_archived(&summarizer, &CancellationToken::new(), 2)
            .await
            .unwrap();

        assert_eq!(done, 2);
        assert!(ledger.archived()[0].summary.is_some());
        assert!(ledger.archived()[2].summary.is_none());
    }

    #[test]
    fn test_messages_since() {
        let mut ledger = SessionLedger::default();
        let now = Utc::now();
        ledger.log_message(ChatMessage::user("Sam", "old").with_timestamp(now - chrono::Duration::hours(2)));
        ledger.log_message(ChatMessage::user("Sam", "new").with_timestamp(now));

        assert_eq!(ledger.messages_since(now - chrono::Duration::hours(1)), 1);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let mut ledger = ledger_with(5);
        ledger
            .start_new_session(true, &CountingSummarizer::new(), &CancellationToken::new())
            .await
            .unwrap();
        ledger.log_message(ChatMessage::user("Sam", "fresh start"));

        ledger.save(&path, true).unwrap();
        let loaded = SessionLedger::load(&path, LedgerConfig::default());

        assert_eq!(loaded.archived(), ledger.archived());
        assert_eq!(loaded.current(), ledger.current());
    }

    #[test]
    fn test_load_missing_is_fresh() {
        let dir = TempDir::new().unwrap();
        let ledger = SessionLedger::load(&dir.path().join("nope.json"), LedgerConfig::default());
        assert!(ledger.current().is_empty());
        assert!(ledger.archived().is_empty());
    }
}
