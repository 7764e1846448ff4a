//! Private reflections on recent conversation.
//!
//! After enough new messages the persona writes a short note to itself. The
//! note is a one-shot natural memory: it surfaces once when relevant and is
//! then forgotten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use lore_llm::Message;
use lore_memory::{InsertionPolicy, MemoryCategory, MemoryRecord};

use crate::error::{AgentError, Result};
use crate::runtime::PersonaRuntime;
use crate::scheduler::{AgentTask, TaskConfig, TaskOutcome};
use crate::template::resolve_template;

pub const REFLECTION_ID: &str = "reflection";

const LAST_RUN: &str = "last_run";
const COOLDOWN_SECS: &str = "cooldown_secs";
const MIN_NEW_MESSAGES: &str = "min_new_messages";
const WINDOW: &str = "window";
const MAX_TOKENS: &str = "max_tokens";

const REFLECTION_PROMPT: &str = "You are {{char}}. Read your recent conversation with \
{{user}} and write a private note to yourself: what {{user}} cares about right now and \
what you want to bring up next time. One or two sentences.";

/// Writes one reflection per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflectionTask;

impl ReflectionTask {
    fn since(config: &TaskConfig) -> DateTime<Utc> {
        config
            .get_datetime(LAST_RUN)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl AgentTask for ReflectionTask {
    fn id(&self) -> &str {
        REFLECTION_ID
    }

    fn default_config(&self) -> TaskConfig {
        TaskConfig::new()
            .with(COOLDOWN_SECS, 1800u64)
            .with(MIN_NEW_MESSAGES, 10u64)
            .with(WINDOW, 20u64)
            .with(MAX_TOKENS, 200u64)
    }

    async fn observe(&self, persona: &PersonaRuntime, config: &TaskConfig) -> bool {
        if !config.cooldown_elapsed(LAST_RUN, config.u64_or(COOLDOWN_SECS, 1800), Utc::now())
            || persona.slot().is_busy()
        {
            return false;
        }
        // A held ledger means the foreground is busy with it.
        let Ok(ledger) = persona.ledger().try_lock() else {
            return false;
        };
        let fresh = ledger.messages_since(Self::since(config)) as u64;
        fresh >= config.u64_or(MIN_NEW_MESSAGES, 10)
    }

    async fn execute(
        &self,
        persona: &PersonaRuntime,
        config: &mut TaskConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let Some(_slot) = persona.slot().try_acquire() else {
            return Ok(TaskOutcome::skipped("inference slot busy"));
        };

        let window = usize::try_from(config.u64_or(WINDOW, 20)).unwrap_or(usize::MAX);
        let (transcript, last_id) = {
            let ledger = persona.ledger().lock().await;
            let mut recent: Vec<_> = ledger
                .sessions()
                .rev()
                .flat_map(|s| s.messages.iter().rev())
                .take(window)
                .collect();
            recent.reverse();
            let last_id = recent.last().map(|m| m.id);
            let lines: Vec<String> = recent.iter().map(|m| m.transcript_line()).collect();
            (lines.join("\n"), last_id)
        };
        let Some(last_id) = last_id else {
            return Ok(TaskOutcome::skipped("no messages"));
        };

        config.set_datetime(LAST_RUN, Utc::now());

        let ctx = persona.template_context();
        let messages = vec![
            Message::system(resolve_template(REFLECTION_PROMPT, &ctx)),
            Message::user(transcript),
        ];
        let max_tokens = u32::try_from(config.u64_or(MAX_TOKENS, 200)).unwrap_or(u32::MAX);
        let text = persona.infer(messages, max_tokens, cancel).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::task(REFLECTION_ID, "backend returned an empty reflection"));
        }

        let record = MemoryRecord::new(MemoryCategory::General, InsertionPolicy::Natural, text)
            .with_priority(0)
            .with_source_key(format!("reflection:{last_id}"));
        let created = persona.memory().memorize(record);

        Ok(TaskOutcome::new(
            usize::from(created),
            format!("reflected on messages up to {last_id}"),
        ))
    }
}
