//! The persona runtime: one explicit context object per persona.
//!
//! [`PersonaRuntime`] bundles everything a turn needs: the cast, settings,
//! the memory store, the session ledger, the inference collaborators and
//! the shared [`InferenceSlot`]. The foreground path and the background
//! scheduler both operate through it.
//!
//! A turn runs:
//!
//! ```text
//! acquire slot → select memories → assemble → infer → commit used memories
//!              → log user turn + reply
//! ```
//!
//! A failed or cancelled turn leaves the ledger and memory policies as they
//! were.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use lore_config::PersonaPaths;
use lore_llm::{
    BruteForceSearch, CharRatioTokenizer, CompletionRequest, LlmError, Message, SharedBackend,
    SharedEmbedder, SharedSearch, SharedTokenizer, StreamEvent, with_retry,
};
use lore_memory::{
    InsertionPolicy, MemoryCategory, MemoryConfig, MemoryId, MemoryRecord, MemoryStore,
    NaturalSelection, RetrievalAdapter,
};
use lore_session::{
    ChatMessage, LedgerConfig, LlmSummarizer, MessageRole, SegmentConfig, SessionId,
    SessionLedger, SessionSummarizer, SessionSummary, SessionTransition, SummarizerConfig,
    parse_raw_log, segment_raw_log,
};
use lore_types::PersonaKey;

use crate::assembler::{AssemblerConfig, AssemblyInput, ContextAssembler, MemoryEntry};
use crate::error::{AgentError, Result};
use crate::persona::{Cast, UserProfile};
use crate::slot::InferenceSlot;
use crate::template::{TemplateContext, resolve_template};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Generation parameters for foreground replies.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_reply_tokens: u32,
    pub stop: Vec<String>,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.8,
            max_reply_tokens: 300,
            stop: Vec::new(),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Component settings for one persona.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub generation: GenerationSettings,
    pub assembler: AssemblerConfig,
    pub memory: MemoryConfig,
    pub ledger: LedgerConfig,
    pub summarizer: SummarizerConfig,
    /// Archived sessions without a summary backfilled per maintenance pass.
    pub backfill_per_maintenance: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            assembler: AssemblerConfig::default(),
            memory: MemoryConfig::default(),
            ledger: LedgerConfig::default(),
            summarizer: SummarizerConfig::default(),
            backfill_per_maintenance: 1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// A generated reply, already logged.
#[derive(Debug, Clone)]
pub struct Reply {
    pub message: ChatMessage,
    pub prompt_tokens: usize,
    /// Memories the prompt carried; each was committed as used.
    pub included_memories: Vec<MemoryId>,
}

/// A message a background task left for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub source: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// What [`PersonaRuntime::maintenance`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub decayed: usize,
    pub embedded: usize,
    pub summarized: usize,
}

/// What [`PersonaRuntime::import_raw_log`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub messages: usize,
    pub skipped_lines: usize,
    pub sessions: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one persona needs to hold a conversation.
pub struct PersonaRuntime {
    key: PersonaKey,
    cast: RwLock<Cast>,
    user: UserProfile,
    settings: RuntimeSettings,
    paths: Option<PersonaPaths>,
    memory: Arc<MemoryStore>,
    ledger: tokio::sync::Mutex<SessionLedger>,
    backend: SharedBackend,
    summarizer: Arc<dyn SessionSummarizer>,
    assembler: ContextAssembler,
    slot: InferenceSlot,
    agent_mode: AtomicBool,
    notifications: Mutex<Vec<Notification>>,
}

impl PersonaRuntime {
    /// Create a builder for a runtime.
    pub fn builder(cast: Cast, backend: SharedBackend) -> PersonaRuntimeBuilder {
        PersonaRuntimeBuilder::new(cast, backend)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn key(&self) -> &PersonaKey {
        &self.key
    }

    pub fn cast(&self) -> Cast {
        self.cast.read().clone()
    }

    /// Hand the next turn to another member of a group cast.
    pub fn set_active_member(&self, index: usize) -> Result<()> {
        self.cast.write().set_active(index)
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn paths(&self) -> Option<&PersonaPaths> {
        self.paths.as_ref()
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn ledger(&self) -> &tokio::sync::Mutex<SessionLedger> {
        &self.ledger
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn slot(&self) -> &InferenceSlot {
        &self.slot
    }

    pub fn agent_mode(&self) -> bool {
        self.agent_mode.load(Ordering::Acquire)
    }

    pub fn set_agent_mode(&self, enabled: bool) {
        self.agent_mode.store(enabled, Ordering::Release);
        tracing::info!(persona = %self.key, enabled, "Agent mode changed");
    }

    // ── Notifications ────────────────────────────────────────────────────────

    /// Stage a message for the user, shown the next time they look.
    pub fn stage_notification(&self, source: impl Into<String>, text: impl Into<String>) {
        let notification = Notification {
            source: source.into(),
            text: text.into(),
            created_at: Utc::now(),
        };
        tracing::debug!(persona = %self.key, source = %notification.source, "Staged notification");
        self.notifications.lock().push(notification);
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.lock().len()
    }

    // ── Prompt text ──────────────────────────────────────────────────────────

    pub fn template_context(&self) -> TemplateContext {
        let cast = self.cast.read();
        TemplateContext::new(&cast.active().display_name, &self.user.name)
            .with_char_bio(cast.character_text())
            .with_user_bio(&self.user.bio)
    }

    /// The fixed preamble: instructions, character and user descriptions.
    pub fn preamble(&self, ctx: &TemplateContext) -> String {
        let instructions = self.cast.read().active().instructions.clone();
        let mut parts = Vec::new();
        if !instructions.trim().is_empty() {
            parts.push(resolve_template(&instructions, ctx));
        }
        if !ctx.char_bio.trim().is_empty() {
            parts.push(resolve_template("{{charbio}}", ctx));
        }
        if !ctx.user_bio.trim().is_empty() {
            parts.push(resolve_template("About {{user}}: {{userbio}}", ctx));
        }
        parts.join("\n\n")
    }

    /// Text memories are matched against: the upcoming turn plus the last
    /// reply in context.
    fn selection_text(ledger: &SessionLedger, upcoming: Option<&ChatMessage>) -> String {
        let mut lines = Vec::new();
        if let Some(reply) = ledger
            .current()
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
        {
            lines.push(reply.content.as_str());
        }
        match upcoming {
            Some(message) => lines.push(message.content.as_str()),
            None => {
                if let Some(last) = ledger
                    .current()
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::User)
                {
                    lines.push(last.content.as_str());
                }
            }
        }
        lines.join("\n")
    }

    // ── Inference ────────────────────────────────────────────────────────────

    /// Run one completion with the configured generation settings. The
    /// caller must hold the inference slot.
    pub async fn infer(
        &self,
        messages: Vec<Message>,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let generation = &self.settings.generation;
        let request = CompletionRequest::new(&generation.model, messages, max_tokens)
            .with_temperature(generation.temperature)
            .with_stop(generation.stop.clone());

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = with_retry(
                generation.max_retries,
                generation.retry_backoff,
                self.backend.name(),
                || self.backend.complete(request.clone()),
            ) => result?,
        };
        Ok(response.text)
    }

    async fn infer_streaming(
        &self,
        messages: Vec<Message>,
        deltas: &UnboundedSender<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let generation = &self.settings.generation;
        let request =
            CompletionRequest::new(&generation.model, messages, generation.max_reply_tokens)
                .with_temperature(generation.temperature)
                .with_stop(generation.stop.clone())
                .with_streaming();

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.backend.complete_stream(request) => result?,
        };

        let mut text = String::new();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                event = stream.next() => event,
            };
            match event {
                Some(Ok(StreamEvent::Delta(delta))) => {
                    text.push_str(&delta);
                    // The receiver may have gone away; the reply is still logged.
                    let _ = deltas.send(delta);
                }
                Some(Ok(StreamEvent::Stop { .. })) | None => break,
                Some(Ok(StreamEvent::Error { message })) => {
                    return Err(LlmError::Stream(message).into());
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
        Ok(text)
    }

    // ── Turns ────────────────────────────────────────────────────────────────

    /// Answer a user message.
    pub async fn respond(&self, text: &str, cancel: &CancellationToken) -> Result<Reply> {
        let upcoming = ChatMessage::user(&self.user.name, text);
        self.generate(Some(upcoming), None, cancel).await
    }

    /// Answer a user message, forwarding text deltas as they arrive.
    pub async fn respond_streaming(
        &self,
        text: &str,
        deltas: UnboundedSender<String>,
        cancel: &CancellationToken,
    ) -> Result<Reply> {
        let upcoming = ChatMessage::user(&self.user.name, text);
        self.generate(Some(upcoming), Some(&deltas), cancel).await
    }

    /// Replace the last reply with a fresh one.
    ///
    /// If generation fails the old reply is put back.
    pub async fn reroll(&self, cancel: &CancellationToken) -> Result<Reply> {
        let removed = {
            let mut ledger = self.ledger.lock().await;
            match ledger.current().messages.last() {
                Some(last) if last.role == MessageRole::Assistant => ledger.remove_last(),
                Some(_) => {
                    return Err(AgentError::NothingToReroll(
                        "last message is not a reply".into(),
                    ));
                }
                None => return Err(AgentError::NothingToReroll("session is empty".into())),
            }
        };

        match self.generate(None, None, cancel).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if let Some(message) = removed {
                    self.ledger.lock().await.log_message(message);
                }
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        upcoming: Option<ChatMessage>,
        deltas: Option<&UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<Reply> {
        let _slot = self.slot.acquire(cancel).await?;

        let selection = {
            let ledger = self.ledger.lock().await;
            Self::selection_text(&ledger, upcoming.as_ref())
        };
        let NaturalSelection {
            winner: natural,
            passed_over,
        } = self.memory.eligible_for_natural_insertion(&selection).await?;
        let mut triggers = self
            .memory
            .recall(&selection, self.memory.config().recall_limit)
            .await?;
        if let Some(winner) = &natural {
            triggers.retain(|r| r.id != winner.id);
        }

        let ctx = self.template_context();
        let natural_entry = natural
            .as_ref()
            .map(|r| MemoryEntry::new(r.id, resolve_template(&r.content, &ctx)));
        let trigger_entries: Vec<MemoryEntry> = triggers
            .iter()
            .map(|r| MemoryEntry::new(r.id, resolve_template(&r.content, &ctx)))
            .collect();
        let preamble = self.preamble(&ctx);

        let prompt = {
            let ledger = self.ledger.lock().await;
            let mut input = AssemblyInput::new(&preamble, &ledger)
                .with_natural(natural_entry.as_ref())
                .with_triggers(&trigger_entries);
            if let Some(message) = &upcoming {
                input = input.with_upcoming(message);
            }
            self.assembler.assemble(&input)?
        };

        let messages = prompt.to_messages();
        let text = match deltas {
            Some(deltas) => self.infer_streaming(messages, deltas, cancel).await?,
            None => {
                self.infer(messages, self.settings.generation.max_reply_tokens, cancel)
                    .await?
            }
        };

        for id in &prompt.included_memories {
            let outcome = self.memory.commit(*id, true);
            tracing::trace!(memory = %id, ?outcome, "Committed memory");
        }
        self.memory.mark_passed_over(&passed_over);

        let author = self.cast.read().active().display_name.clone();
        let reply = ChatMessage::assistant(author, text.trim());
        {
            let mut ledger = self.ledger.lock().await;
            if let Some(message) = upcoming {
                ledger.log_message(message);
            }
            ledger.log_message(reply.clone());
        }

        tracing::debug!(
            persona = %self.key,
            prompt_tokens = prompt.total_tokens,
            memories = prompt.included_memories.len(),
            "Reply generated"
        );
        Ok(Reply {
            message: reply,
            prompt_tokens: prompt.total_tokens,
            included_memories: prompt.included_memories,
        })
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// End the current session.
    ///
    /// An archived session's summary becomes a trigger memory and each of
    /// its goals a natural memory.
    pub async fn end_session(
        &self,
        archive: bool,
        cancel: &CancellationToken,
    ) -> Result<SessionTransition> {
        let _slot = self.slot.acquire(cancel).await?;
        let transition = {
            let mut ledger = self.ledger.lock().await;
            ledger
                .start_new_session(archive, self.summarizer.as_ref(), cancel)
                .await?
        };

        if let SessionTransition::Archived {
            session_id,
            summary,
            embedding,
        } = &transition
        {
            let created = self.memorize_session(*session_id, summary, embedding.clone());
            tracing::info!(persona = %self.key, session = %session_id, created, "Session memorized");
        }
        Ok(transition)
    }

    fn memorize_session(
        &self,
        session_id: SessionId,
        summary: &SessionSummary,
        embedding: Option<Vec<f32>>,
    ) -> usize {
        let mut record = MemoryRecord::new(
            MemoryCategory::SessionSummary,
            InsertionPolicy::Trigger,
            format!("{}: {}", summary.title, summary.summary),
        )
        .with_keywords(summary.keywords.iter().cloned())
        .with_source_key(format!("session:{session_id}"))
        .with_priority(i32::from(summary.importance));
        if let Some(embedding) = embedding {
            record = record.with_embedding(embedding);
        }

        let mut created = usize::from(self.memory.memorize(record));
        for (n, goal) in summary.goals.iter().enumerate() {
            let record = MemoryRecord::new(MemoryCategory::Goal, InsertionPolicy::Natural, goal)
                .with_source_key(format!("goal:{session_id}:{n}"));
            created += usize::from(self.memory.memorize(record));
        }
        created
    }

    /// Replace the archive with sessions segmented from a JSON-lines log.
    pub async fn import_raw_log(&self, text: &str, segment: &SegmentConfig) -> ImportReport {
        let (messages, skipped_lines) = parse_raw_log(text);
        let count = messages.len();
        let segments = segment_raw_log(messages, segment);
        let sessions = self.ledger.lock().await.import_segments(segments);
        ImportReport {
            messages: count,
            skipped_lines,
            sessions,
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Decay stale memories, embed queued records and, when the inference
    /// slot is free, backfill missing session summaries.
    pub async fn maintenance(&self, cancel: &CancellationToken) -> Result<MaintenanceReport> {
        let decayed = self.memory.decay_sweep(Utc::now()).len();
        let embedded = self.memory.embed_pending(cancel).await?;

        let mut summarized = 0;
        if self.settings.backfill_per_maintenance > 0
            && let Some(_slot) = self.slot.try_acquire()
        {
            let mut ledger = self.ledger.lock().await;
            summarized = ledger
                .summarize_archived(
                    self.summarizer.as_ref(),
                    cancel,
                    self.settings.backfill_per_maintenance,
                )
                .await?;
        }

        let report = MaintenanceReport {
            decayed,
            embedded,
            summarized,
        };
        tracing::debug!(persona = %self.key, ?report, "Maintenance pass");
        Ok(report)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Write memories and sessions, rotating the previous files to `.bak`.
    pub async fn save(&self) -> Result<()> {
        let Some(paths) = &self.paths else {
            tracing::debug!(persona = %self.key, "No data directory, skipping save");
            return Ok(());
        };
        self.memory.save(&paths.memories(), true)?;
        self.ledger.lock().await.save(&paths.sessions(), true)?;
        tracing::debug!(persona = %self.key, dir = %paths.root().display(), "Persona saved");
        Ok(())
    }
}

impl std::fmt::Debug for PersonaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonaRuntime")
            .field("key", &self.key)
            .field("backend", &self.backend.name())
            .field("agent_mode", &self.agent_mode())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`PersonaRuntime`].
///
/// With a data directory, memories and sessions are loaded from the
/// persona's files; otherwise the runtime starts empty.
pub struct PersonaRuntimeBuilder {
    cast: Cast,
    backend: SharedBackend,
    key: Option<PersonaKey>,
    user: UserProfile,
    settings: RuntimeSettings,
    data_dir: Option<std::path::PathBuf>,
    memory: Option<Arc<MemoryStore>>,
    ledger: Option<SessionLedger>,
    summarizer: Option<Arc<dyn SessionSummarizer>>,
    embedder: Option<SharedEmbedder>,
    search: Option<SharedSearch>,
    tokenizer: Option<SharedTokenizer>,
    agent_mode: bool,
}

impl PersonaRuntimeBuilder {
    pub fn new(cast: Cast, backend: SharedBackend) -> Self {
        Self {
            cast,
            backend,
            key: None,
            user: UserProfile::new("User"),
            settings: RuntimeSettings::default(),
            data_dir: None,
            memory: None,
            ledger: None,
            summarizer: None,
            embedder: None,
            search: None,
            tokenizer: None,
            agent_mode: false,
        }
    }

    /// Key for persisted state. Defaults to the active persona's key.
    pub fn with_key(mut self, key: PersonaKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_user(mut self, user: UserProfile) -> Self {
        self.user = user;
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Load and save state under `<data_dir>/personas/<key>/`.
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(data_dir.as_ref().to_path_buf());
        self
    }

    /// Use an existing store instead of loading one.
    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Use an existing ledger instead of loading one.
    pub fn with_ledger(mut self, ledger: SessionLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn SessionSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_search(mut self, search: SharedSearch) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: SharedTokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_agent_mode(mut self, enabled: bool) -> Self {
        self.agent_mode = enabled;
        self
    }

    pub fn build(self) -> PersonaRuntime {
        let key = self
            .key
            .unwrap_or_else(|| self.cast.active().key.clone());
        let paths = self
            .data_dir
            .as_deref()
            .map(|dir| PersonaPaths::new(dir, &key));

        let memory = match self.memory {
            Some(memory) => memory,
            None => {
                let config = self.settings.memory.clone();
                let mut store = match &paths {
                    Some(paths) => MemoryStore::load(&paths.memories(), config),
                    None => MemoryStore::new(config),
                };
                if let Some(embedder) = &self.embedder {
                    let search = self
                        .search
                        .clone()
                        .unwrap_or_else(|| Arc::new(BruteForceSearch));
                    store = store.with_retrieval(RetrievalAdapter::new(embedder.clone(), search));
                }
                Arc::new(store)
            }
        };

        let ledger = match (self.ledger, &paths) {
            (Some(ledger), _) => ledger,
            (None, Some(paths)) => SessionLedger::load(&paths.sessions(), self.settings.ledger.clone()),
            (None, None) => SessionLedger::new(self.settings.ledger.clone()),
        };

        let summarizer = self.summarizer.unwrap_or_else(|| {
            let mut summarizer =
                LlmSummarizer::new(self.backend.clone(), self.settings.summarizer.clone());
            if let Some(embedder) = &self.embedder {
                summarizer = summarizer.with_embedder(embedder.clone());
            }
            Arc::new(summarizer)
        });

        let tokenizer = self
            .tokenizer
            .unwrap_or_else(|| Arc::new(CharRatioTokenizer::default()));
        let assembler = ContextAssembler::new(self.settings.assembler.clone(), tokenizer);

        tracing::debug!(
            persona = %key,
            memories = memory.len(),
            messages = ledger.message_count(),
            "Persona runtime ready"
        );

        PersonaRuntime {
            key,
            cast: RwLock::new(self.cast),
            user: self.user,
            settings: self.settings,
            paths,
            memory,
            ledger: tokio::sync::Mutex::new(ledger),
            backend: self.backend,
            summarizer,
            assembler,
            slot: InferenceSlot::new(),
            agent_mode: AtomicBool::new(self.agent_mode),
            notifications: Mutex::new(Vec::new()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
