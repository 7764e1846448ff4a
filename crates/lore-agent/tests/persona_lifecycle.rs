//! End-to-end persona lifecycle tests.
//!
//! A conversation is archived, its goal is researched in the background and
//! the research surfaces in the next reply.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use lore_agent::{
    AgentScheduler, Cast, GOAL_RESEARCH_ID, GoalResearchTask, MAINTENANCE_ID, MaintenanceTask,
    Persona, PersonaRuntime, RuntimeSettings, SchedulerConfig, TickOutcome, UserProfile,
};
use lore_llm::{MockBackend, MockEmbedder};
use lore_memory::{InsertionPolicy, MemoryCategory, MemoryRecord};
use lore_session::SessionTransition;
use lore_types::PersonaKey;
use tokio_util::sync::CancellationToken;

const SUMMARY: &str = r#"{"title":"Flute","summary":"Sam wants to learn the flute.","keywords":["flute"],"goals":["learn the flute"],"roleplay":false,"importance":3}"#;

fn aria() -> Cast {
    Cast::Single(
        Persona::new(PersonaKey::new("aria").unwrap(), "Aria")
            .with_instructions("You are {{char}}, a music tutor."),
    )
}

fn settings() -> RuntimeSettings {
    let mut settings = RuntimeSettings::default();
    // Research notes surface on the first selection round.
    settings.memory.forced_after_turns = 0;
    settings
}

#[tokio::test]
async fn test_goal_research_surfaces_in_next_reply() -> Result<()> {
    let backend = Arc::new(MockBackend::new(vec![
        "Hi Sam!".to_string(),
        "That sounds fun.".to_string(),
        SUMMARY.to_string(),
        "Start with long tones for ten minutes a day.".to_string(),
        "How were the long tones?".to_string(),
    ]));
    let runtime = Arc::new(
        PersonaRuntime::builder(aria(), backend.clone())
            .with_user(UserProfile::new("Sam"))
            .with_settings(settings())
            .with_embedder(Arc::new(MockEmbedder::default()))
            .build(),
    );
    let cancel = CancellationToken::new();

    runtime.respond("hello", &cancel).await?;
    runtime.respond("I want to learn the flute", &cancel).await?;

    let transition = runtime.end_session(true, &cancel).await?;
    assert!(matches!(transition, SessionTransition::Archived { .. }));
    let goals: Vec<_> = runtime
        .memory()
        .records()
        .into_iter()
        .filter(|r| r.category == MemoryCategory::Goal)
        .collect();
    assert_eq!(goals.len(), 1);

    runtime.set_agent_mode(true);
    let scheduler = AgentScheduler::new(runtime.clone(), SchedulerConfig::default())
        .with_task(Arc::new(GoalResearchTask));

    let outcome = scheduler.tick(&cancel).await;
    assert!(
        matches!(&outcome, TickOutcome::Executed { task, .. } if task == GOAL_RESEARCH_ID),
        "unexpected outcome: {outcome:?}"
    );
    let notifications = runtime.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].source, GOAL_RESEARCH_ID);

    // Researched once; the cooldown keeps the next tick idle.
    assert_eq!(scheduler.tick(&cancel).await, TickOutcome::Idle);

    let research = runtime
        .memory()
        .records()
        .into_iter()
        .find(|r| r.category == MemoryCategory::WebResearch)
        .expect("research notes memorized");
    assert_eq!(research.policy, InsertionPolicy::NaturalForced);

    let reply = runtime.respond("what should I practice?", &cancel).await?;
    assert_eq!(reply.message.content, "How were the long tones?");
    assert!(reply.included_memories.contains(&research.id));

    let last_request = backend.requests().pop().expect("request recorded");
    assert!(
        last_request
            .messages
            .iter()
            .any(|m| m.content.contains("long tones for ten minutes"))
    );
    assert!(
        last_request
            .messages
            .iter()
            .any(|m| m.content.contains("Previous sessions:"))
    );
    Ok(())
}

#[tokio::test]
async fn test_goal_surfaces_once_maintenance_embeds_it() -> Result<()> {
    let backend = Arc::new(MockBackend::new(vec![
        "Hi Sam!".to_string(),
        "That sounds fun.".to_string(),
        SUMMARY.to_string(),
        "Have you picked a flute yet?".to_string(),
    ]));
    let runtime = Arc::new(
        PersonaRuntime::builder(aria(), backend)
            .with_user(UserProfile::new("Sam"))
            .with_embedder(Arc::new(MockEmbedder::default()))
            .build(),
    );
    let cancel = CancellationToken::new();

    runtime.respond("hello", &cancel).await?;
    runtime.respond("I want to learn the flute", &cancel).await?;
    runtime.end_session(true, &cancel).await?;

    let goal = runtime
        .memory()
        .records()
        .into_iter()
        .find(|r| r.category == MemoryCategory::Goal)
        .expect("goal memorized");
    assert!(goal.embedding.is_none());
    assert!(runtime.memory().pending_embeddings() > 0);

    runtime.set_agent_mode(true);
    let scheduler = AgentScheduler::new(runtime.clone(), SchedulerConfig::default())
        .with_task(Arc::new(MaintenanceTask));
    let outcome = scheduler.tick(&cancel).await;
    assert!(
        matches!(&outcome, TickOutcome::Executed { task, .. } if task == MAINTENANCE_ID),
        "unexpected outcome: {outcome:?}"
    );
    assert_eq!(runtime.memory().pending_embeddings(), 0);

    let reply = runtime.respond("learn the flute", &cancel).await?;
    assert_eq!(reply.message.content, "Have you picked a flute yet?");
    assert!(reply.included_memories.contains(&goal.id));
    Ok(())
}

#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cancel = CancellationToken::new();
    {
        let runtime = PersonaRuntime::builder(aria(), Arc::new(MockBackend::repeating("ok")))
            .with_data_dir(dir.path())
            .build();
        runtime.respond("remember me", &cancel).await?;
        runtime.memory().memorize(MemoryRecord::new(
            MemoryCategory::WorldFact,
            InsertionPolicy::Trigger,
            "The recital is in May.",
        ));
        runtime.save().await?;
    }

    let runtime = PersonaRuntime::builder(aria(), Arc::new(MockBackend::repeating("ok")))
        .with_data_dir(dir.path())
        .build();
    assert_eq!(runtime.ledger().lock().await.message_count(), 2);
    assert_eq!(runtime.memory().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_background_task_and_reply_share_one_slot() -> Result<()> {
    let backend = Arc::new(MockBackend::repeating("Some notes.").with_delay(Duration::from_secs(5)));
    let runtime = Arc::new(
        PersonaRuntime::builder(aria(), backend.clone())
            .with_agent_mode(true)
            .build(),
    );
    runtime.memory().memorize(MemoryRecord::new(
        MemoryCategory::Goal,
        InsertionPolicy::Natural,
        "run a marathon",
    ));
    let scheduler = Arc::new(
        AgentScheduler::new(runtime.clone(), SchedulerConfig::default())
            .with_task(Arc::new(GoalResearchTask)),
    );
    let cancel = CancellationToken::new();

    let background = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.tick(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(runtime.slot().is_busy());

    let reply = runtime.respond("hello", &cancel).await?;
    assert_eq!(reply.message.content, "Some notes.");

    assert!(matches!(background.await?, TickOutcome::Executed { .. }));
    assert_eq!(backend.request_count(), 2);
    assert_eq!(backend.max_in_flight(), 1);
    Ok(())
}
