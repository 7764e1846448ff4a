//! Context assembly under a hard token budget.
//!
//! The assembler decides what goes into the next model invocation:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ previous session summaries   │  reserved only for sessions outside history
//! │ preamble                     │  always present
//! │ trigger memories             │  when placement = preamble
//! ├──────────────────────────────┤
//! │ history (oldest kept)        │
//! │ ...                          │
//! │ inline memory                │  at inline_position
//! │ ...                          │
//! │ history (most recent)        │
//! ├──────────────────────────────┤
//! │ upcoming turn                │
//! └──────────────────────────────┘
//! ```
//!
//! Memories are packed before history. History is packed greedily from the
//! most recent message backward and stops at the first message that does
//! not fit, so the window never has gaps.

use std::collections::HashSet;

use lore_llm::{Message, Role, SharedTokenizer};
use lore_memory::MemoryId;
use lore_session::{ChatMessage, ChatSession, MessageId, SessionId, SessionLedger};

use crate::error::{AgentError, Result};

const SUMMARY_HEADER: &str = "Previous sessions:";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where trigger memories go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryPlacement {
    /// A system entry directly after the preamble.
    #[default]
    Preamble,
    /// Together with the natural memory inside the history.
    Inline,
}

/// Which sessions the history walk may draw from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryScope {
    #[default]
    CurrentSession,
    /// Continue into archived sessions, newest first.
    AllSessions,
}

/// Token budget and layout rules.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerConfig {
    pub context_window: usize,
    pub reply_reserve: usize,
    pub safety_margin: usize,
    /// Set aside for previous-session summaries when any exist.
    pub summary_budget: usize,
    /// 0.0 puts the inline memory at the oldest edge of the history, 1.0
    /// directly before the upcoming turn.
    pub inline_position: f32,
    pub memory_placement: MemoryPlacement,
    pub history_scope: HistoryScope,
    pub max_trigger_memories: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            context_window: 4096,
            reply_reserve: 300,
            safety_margin: 64,
            summary_budget: 200,
            inline_position: 0.8,
            memory_placement: MemoryPlacement::Preamble,
            history_scope: HistoryScope::CurrentSession,
            max_trigger_memories: 3,
        }
    }
}

impl AssemblerConfig {
    /// Tokens available to the prompt itself.
    pub fn prompt_budget(&self) -> usize {
        self.context_window
            .saturating_sub(self.reply_reserve)
            .saturating_sub(self.safety_margin)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input / Output
// ─────────────────────────────────────────────────────────────────────────────

/// A retrieved memory ready for the prompt, macros already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub text: String,
}

impl MemoryEntry {
    pub fn new(id: MemoryId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Everything one assembly pass reads.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub preamble: &'a str,
    pub ledger: &'a SessionLedger,
    /// The turn being answered, not yet logged.
    pub upcoming: Option<&'a ChatMessage>,
    pub natural: Option<&'a MemoryEntry>,
    /// Trigger memories by rank, best first.
    pub triggers: &'a [MemoryEntry],
}

impl<'a> AssemblyInput<'a> {
    pub fn new(preamble: &'a str, ledger: &'a SessionLedger) -> Self {
        Self {
            preamble,
            ledger,
            upcoming: None,
            natural: None,
            triggers: &[],
        }
    }

    pub fn with_upcoming(mut self, message: &'a ChatMessage) -> Self {
        self.upcoming = Some(message);
        self
    }

    pub fn with_natural(mut self, entry: Option<&'a MemoryEntry>) -> Self {
        self.natural = entry;
        self
    }

    pub fn with_triggers(mut self, entries: &'a [MemoryEntry]) -> Self {
        self.triggers = entries;
        self
    }
}

/// What a prompt entry was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    SessionSummaries,
    Preamble,
    TriggerMemories,
    InlineMemory,
    History(MessageId),
    Upcoming,
}

/// One entry of the final prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptEntry {
    pub role: Role,
    pub text: String,
    pub tokens: usize,
    pub kind: EntryKind,
}

impl PromptEntry {
    fn new(role: Role, text: String, tokens: usize, kind: EntryKind) -> Self {
        Self {
            role,
            text,
            tokens,
            kind,
        }
    }
}

/// The ordered prompt plus accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub entries: Vec<PromptEntry>,
    pub total_tokens: usize,
    /// Tokens the prompt was allowed to use.
    pub budget: usize,
    /// Memories that made it into the prompt; commit exactly these.
    pub included_memories: Vec<MemoryId>,
}

impl AssembledPrompt {
    /// Convert to backend messages.
    pub fn to_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|e| Message {
                role: e.role,
                content: e.text.clone(),
            })
            .collect()
    }

    /// Ids of the history messages in the window, oldest first.
    pub fn history_ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter_map(|e| match e.kind {
                EntryKind::History(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn has(&self, kind: &EntryKind) -> bool {
        self.entries.iter().any(|e| &e.kind == kind)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assembler
// ─────────────────────────────────────────────────────────────────────────────

struct PackedHistory {
    entries: Vec<PromptEntry>,
    sessions: HashSet<SessionId>,
}

struct PackedBody {
    natural: Option<(String, usize)>,
    triggers: Vec<(String, usize)>,
    included_memories: Vec<MemoryId>,
    history: PackedHistory,
}

/// Builds prompts within the configured token budget.
pub struct ContextAssembler {
    config: AssemblerConfig,
    tokenizer: SharedTokenizer,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig, tokenizer: SharedTokenizer) -> Self {
        Self { config, tokenizer }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Assemble the prompt for one turn.
    ///
    /// Fails with [`AgentError::BudgetExhausted`] when the preamble and the
    /// upcoming turn alone use the whole budget. Reads nothing but `input`,
    /// so identical input yields an identical prompt.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Result<AssembledPrompt> {
        let budget = self.config.prompt_budget();

        let preamble_tokens = self.count(input.preamble);
        let upcoming = input.upcoming.map(|m| {
            let line = m.transcript_line();
            let tokens = self.count(&line);
            PromptEntry::new(m.role.prompt_role(), line, tokens, EntryKind::Upcoming)
        });
        let fixed = preamble_tokens + upcoming.as_ref().map_or(0, |e| e.tokens);
        if fixed >= budget {
            return Err(AgentError::BudgetExhausted {
                required: fixed,
                available: budget,
            });
        }
        let mut remaining = budget - fixed;

        // Summaries only claim their reserve when some summarized session
        // would be left outside the history window without it.
        let mut body = self.pack_body(input, remaining);
        let mut summary_reserve = 0;
        if self.config.summary_budget > 0
            && self.summaries_outside(input.ledger, &body.history.sessions)
        {
            summary_reserve = self.config.summary_budget.min(remaining);
            remaining -= summary_reserve;
            body = self.pack_body(input, remaining);
        }
        let PackedBody {
            natural,
            triggers,
            included_memories,
            history: PackedHistory {
                entries: mut history,
                sessions: contributing,
            },
        } = body;

        let mut inline_parts: Vec<(String, usize)> = natural.into_iter().collect();
        let mut preamble_parts = Vec::new();
        match self.config.memory_placement {
            MemoryPlacement::Inline => inline_parts.extend(triggers),
            MemoryPlacement::Preamble => preamble_parts = triggers,
        }
        if let Some(entry) = joined_entry(inline_parts, EntryKind::InlineMemory) {
            let position = self.config.inline_position.clamp(0.0, 1.0);
            let index = ((history.len() as f32) * position).round() as usize;
            history.insert(index.min(history.len()), entry);
        }

        // ── Layout ───────────────────────────────────────────────────────────
        let mut entries = Vec::with_capacity(history.len() + 4);
        if let Some(entry) = self.summary_entry(input.ledger, &contributing, summary_reserve) {
            entries.push(entry);
        }
        if !input.preamble.is_empty() {
            entries.push(PromptEntry::new(
                Role::System,
                input.preamble.to_string(),
                preamble_tokens,
                EntryKind::Preamble,
            ));
        }
        if let Some(entry) = joined_entry(preamble_parts, EntryKind::TriggerMemories) {
            entries.push(entry);
        }
        entries.extend(history);
        entries.extend(upcoming);

        let total_tokens = entries.iter().map(|e| e.tokens).sum();
        tracing::debug!(
            budget,
            total_tokens,
            entries = entries.len(),
            memories = included_memories.len(),
            "Assembled prompt"
        );

        Ok(AssembledPrompt {
            entries,
            total_tokens,
            budget,
            included_memories,
        })
    }

    /// Memories first, then as much history as still fits.
    fn pack_body(&self, input: &AssemblyInput<'_>, mut remaining: usize) -> PackedBody {
        let mut included_memories = Vec::new();
        let mut fit = |entry: &MemoryEntry, remaining: &mut usize| -> Option<(String, usize)> {
            let tokens = self.count(&entry.text);
            if tokens > *remaining {
                tracing::debug!(memory = %entry.id, tokens, remaining = *remaining, "Memory does not fit");
                return None;
            }
            *remaining -= tokens;
            included_memories.push(entry.id);
            Some((entry.text.clone(), tokens))
        };

        let natural = input.natural.and_then(|m| fit(m, &mut remaining));
        let natural_id = input.natural.map(|m| m.id);
        let triggers: Vec<(String, usize)> = input
            .triggers
            .iter()
            .filter(|m| Some(m.id) != natural_id)
            .take(self.config.max_trigger_memories)
            .filter_map(|m| fit(m, &mut remaining))
            .collect();

        let history = self.pack_history(input.ledger, &mut remaining);
        PackedBody {
            natural,
            triggers,
            included_memories,
            history,
        }
    }

    fn summaries_outside(
        &self,
        ledger: &SessionLedger,
        contributing: &HashSet<SessionId>,
    ) -> bool {
        ledger
            .archived()
            .iter()
            .any(|s| s.summary.is_some() && !contributing.contains(&s.id))
    }

    /// Walk history backward until a message does not fit.
    fn pack_history(&self, ledger: &SessionLedger, remaining: &mut usize) -> PackedHistory {
        let sessions: Vec<&ChatSession> = match self.config.history_scope {
            HistoryScope::CurrentSession => vec![ledger.current()],
            HistoryScope::AllSessions => ledger.sessions().rev().collect(),
        };

        let mut entries = Vec::new();
        let mut contributing = HashSet::new();
        'walk: for session in sessions {
            for message in session.messages.iter().rev() {
                let line = message.transcript_line();
                let tokens = self.count(&line);
                if tokens > *remaining {
                    break 'walk;
                }
                *remaining -= tokens;
                contributing.insert(session.id);
                entries.push(PromptEntry::new(
                    message.role.prompt_role(),
                    line,
                    tokens,
                    EntryKind::History(message.id),
                ));
            }
        }

        entries.reverse();
        PackedHistory {
            entries,
            sessions: contributing,
        }
    }

    /// One-line summaries of archived sessions outside the live window,
    /// newest first until the reserve runs out, then put back in order.
    fn summary_entry(
        &self,
        ledger: &SessionLedger,
        contributing: &HashSet<SessionId>,
        reserve: usize,
    ) -> Option<PromptEntry> {
        let mut used = self.count(SUMMARY_HEADER);
        if used > reserve {
            return None;
        }

        let mut lines = Vec::new();
        for session in ledger.archived().iter().rev() {
            if contributing.contains(&session.id) {
                continue;
            }
            let Some(summary) = &session.summary else {
                continue;
            };
            let line = format!("- {}", summary.one_line());
            let tokens = self.count(&line);
            if used + tokens > reserve {
                break;
            }
            used += tokens;
            lines.push(line);
        }
        if lines.is_empty() {
            return None;
        }

        lines.reverse();
        let text = format!("{SUMMARY_HEADER}\n{}", lines.join("\n"));
        Some(PromptEntry::new(
            Role::System,
            text,
            used,
            EntryKind::SessionSummaries,
        ))
    }
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Join memory texts into one system entry; its cost is the sum of the
/// parts.
fn joined_entry(parts: Vec<(String, usize)>, kind: EntryKind) -> Option<PromptEntry> {
    if parts.is_empty() {
        return None;
    }
    let tokens = parts.iter().map(|(_, t)| t).sum();
    let text = parts
        .into_iter()
        .map(|(text, _)| text)
        .collect::<Vec<_>>()
        .join("\n");
    Some(PromptEntry::new(Role::System, text, tokens, kind))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
