//! Research the user's goals while they are away.
//!
//! Goals come from archived session summaries. Each goal is researched once;
//! the notes become a forced-natural memory so they surface in conversation
//! within a bounded number of turns.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use lore_llm::Message;
use lore_memory::{InsertionPolicy, MemoryCategory, MemoryId, MemoryRecord, MemoryStore};

use crate::error::{AgentError, Result};
use crate::runtime::PersonaRuntime;
use crate::scheduler::{AgentTask, TaskConfig, TaskOutcome};
use crate::template::resolve_template;

pub const GOAL_RESEARCH_ID: &str = "goal_research";

const LAST_RUN: &str = "last_run";
const COOLDOWN_SECS: &str = "cooldown_secs";
const MAX_TOKENS: &str = "max_tokens";
const COMPLETED: &str = "completed";

const RESEARCH_PROMPT: &str = "You are {{char}}. {{user}} mentioned a goal. Write short, \
practical notes that would help {{user}} with it: key facts, first steps, and one thing \
to ask {{user}} about next time. Plain text, no more than a paragraph.";

/// Source key of the research notes for a goal.
pub fn research_key(goal: MemoryId) -> String {
    format!("research:{goal}")
}

/// Goals without research notes, oldest first.
pub fn pending_goals(memory: &MemoryStore) -> Vec<MemoryRecord> {
    let records = memory.records();
    let researched: HashSet<&str> = records
        .iter()
        .filter_map(|r| r.source_key.as_deref())
        .filter(|k| k.starts_with("research:"))
        .collect();

    let mut goals: Vec<MemoryRecord> = records
        .iter()
        .filter(|r| r.category == MemoryCategory::Goal && !r.policy.is_disabled())
        .filter(|r| !researched.contains(research_key(r.id).as_str()))
        .cloned()
        .collect();
    goals.sort_by_key(|r| r.created_at);
    goals
}

/// Researches one pending goal per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalResearchTask;

#[async_trait]
impl AgentTask for GoalResearchTask {
    fn id(&self) -> &str {
        GOAL_RESEARCH_ID
    }

    fn default_config(&self) -> TaskConfig {
        TaskConfig::new()
            .with(COOLDOWN_SECS, 3600u64)
            .with(MAX_TOKENS, 400u64)
    }

    async fn observe(&self, persona: &PersonaRuntime, config: &TaskConfig) -> bool {
        config.cooldown_elapsed(LAST_RUN, config.u64_or(COOLDOWN_SECS, 3600), Utc::now())
            && !persona.slot().is_busy()
            && !pending_goals(persona.memory()).is_empty()
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
        let Some(goal) = pending_goals(persona.memory()).into_iter().next() else {
            return Ok(TaskOutcome::skipped("no pending goals"));
        };

        // A failed run still waits out the cooldown.
        config.set_datetime(LAST_RUN, Utc::now());

        let ctx = persona.template_context();
        let goal_text = resolve_template(&goal.content, &ctx);
        let messages = vec![
            Message::system(resolve_template(RESEARCH_PROMPT, &ctx)),
            Message::user(format!("Goal: {goal_text}")),
        ];
        let max_tokens = u32::try_from(config.u64_or(MAX_TOKENS, 400)).unwrap_or(u32::MAX);
        let notes = persona.infer(messages, max_tokens, cancel).await?;
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(AgentError::task(GOAL_RESEARCH_ID, "backend returned empty notes"));
        }

        let record = MemoryRecord::new(
            MemoryCategory::WebResearch,
            InsertionPolicy::NaturalForced,
            format!("Notes on \"{}\": {notes}", goal.content),
        )
        .with_source_key(research_key(goal.id));
        let created = persona.memory().memorize(record);
        if created {
            persona.stage_notification(
                GOAL_RESEARCH_ID,
                format!("I looked into \"{goal_text}\" for you."),
            );
        }
        config.increment(COMPLETED);

        Ok(TaskOutcome::new(
            usize::from(created),
            format!("researched goal {}", goal.id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{Cast, Persona, UserProfile};
    use lore_llm::MockBackend;
    use lore_types::PersonaKey;
    use std::sync::Arc;

    fn runtime(backend: Arc<MockBackend>) -> PersonaRuntime {
        let cast = Cast::Single(Persona::new(PersonaKey::new("aria").unwrap(), "Aria"));
        PersonaRuntime::builder(cast, backend)
            .with_user(UserProfile::new("Sam"))
            .build()
    }

    fn goal(text: &str) -> MemoryRecord {
        MemoryRecord::new(MemoryCategory::Goal, InsertionPolicy::Natural, text)
    }

    #[tokio::test]
    async fn test_not_runnable_without_goals() {
        let rt = runtime(Arc::new(MockBackend::repeating("notes")));
        let task = GoalResearchTask;
        assert!(!task.observe(&rt, &task.default_config()).await);
    }

    #[tokio::test]
    async fn test_not_runnable_while_slot_busy() {
        let rt = runtime(Arc::new(MockBackend::repeating("notes")));
        rt.memory().memorize(goal("learn the flute"));
        let task = GoalResearchTask;

        let guard = rt.slot().try_acquire().unwrap();
        assert!(!task.observe(&rt, &task.default_config()).await);
        drop(guard);
        assert!(task.observe(&rt, &task.default_config()).await);
    }

    #[tokio::test]
    async fn test_researches_goal_once() {
        let backend = Arc::new(MockBackend::repeating("Start with a beginner flute."));
        let rt = runtime(backend.clone());
        let g = goal("learn the flute");
        let goal_id = g.id;
        rt.memory().memorize(g);
        let task = GoalResearchTask;
        let mut config = task.default_config();

        let outcome = task
            .execute(&rt, &mut config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.memorized, 1);
        let research = rt
            .memory()
            .records()
            .into_iter()
            .find(|r| r.category == MemoryCategory::WebResearch)
            .unwrap();
        assert_eq!(research.policy, InsertionPolicy::NaturalForced);
        assert_eq!(research.source_key, Some(research_key(goal_id)));
        assert_eq!(
            research.content,
            "Notes on \"learn the flute\": Start with a beginner flute."
        );
        assert!(pending_goals(rt.memory()).is_empty());
        assert_eq!(rt.take_notifications().len(), 1);
        assert!(backend.requests()[0].messages[0].content.contains("You are Aria."));

        // Cooldown now blocks another run.
        rt.memory().memorize(goal("join a band"));
        assert!(!task.observe(&rt, &config).await);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_goal_pending() {
        let rt = runtime(Arc::new(MockBackend::failing("offline")));
        rt.memory().memorize(goal("learn the flute"));
        let task = GoalResearchTask;
        let mut config = task.default_config();

        let result = task.execute(&rt, &mut config, &CancellationToken::new()).await;

        assert!(matches!(result, Err(AgentError::Llm(_))));
        assert_eq!(pending_goals(rt.memory()).len(), 1);
        assert!(config.get_datetime(LAST_RUN).is_some());
        assert!(!rt.slot().is_busy());
    }

    #[test]
    fn test_disabled_goals_not_pending() {
        let store = MemoryStore::new(Default::default());
        let g = goal("learn the flute");
        let id = g.id;
        store.memorize(g);
        store.set_policy(id, InsertionPolicy::Disabled);

        assert!(pending_goals(&store).is_empty());
    }
}
