//! Scheduler liveness: tasks keep running, never overlap, and the loop
//! stops promptly when cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use lore_agent::{
    AgentScheduler, AgentTask, CancellationToken, Cast, Persona, PersonaRuntime, SchedulerConfig,
    TaskConfig, TaskOutcome,
};
use lore_llm::MockBackend;
use lore_types::PersonaKey;

/// Always wants to run; each run takes three seconds.
#[derive(Default)]
struct BusyTask {
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl AgentTask for BusyTask {
    fn id(&self) -> &str {
        "busy"
    }

    fn default_config(&self) -> TaskConfig {
        TaskConfig::new()
    }

    async fn observe(&self, _persona: &PersonaRuntime, _config: &TaskConfig) -> bool {
        true
    }

    async fn execute(
        &self,
        _persona: &PersonaRuntime,
        config: &mut TaskConfig,
        _cancel: &CancellationToken,
    ) -> lore_agent::Result<TaskOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        config.increment("runs");
        Ok(TaskOutcome::new(0, "busy"))
    }
}

fn runtime(agent_mode: bool) -> Arc<PersonaRuntime> {
    let cast = Cast::Single(Persona::new(PersonaKey::new("aria").unwrap(), "Aria"));
    Arc::new(
        PersonaRuntime::builder(cast, Arc::new(MockBackend::repeating("ok")))
            .with_agent_mode(agent_mode)
            .build(),
    )
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        initial_delay: Duration::from_secs(1),
        task_interval: Duration::from_secs(1),
        idle_poll: Duration::from_secs(10),
        ..SchedulerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_runs_never_overlap() -> Result<()> {
    let task = Arc::new(BusyTask::default());
    let scheduler = Arc::new(
        AgentScheduler::new(runtime(true), config()).with_task(task.clone()),
    );
    let cancel = CancellationToken::new();

    let looping = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    // Manual ticks race the loop.
    let manual = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for _ in 0..3 {
                scheduler.tick(&cancel).await;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(20)).await;
    manual.await?;
    cancel.cancel();
    looping.await??;

    assert_eq!(task.max_in_flight.load(Ordering::SeqCst), 1);
    let runs = task.runs.load(Ordering::SeqCst);
    assert!(runs >= 5, "only {runs} runs in 20s");
    assert_eq!(scheduler.stats().executed as usize, runs);
    assert_eq!(
        scheduler.task_config("busy").and_then(|c| c.get_u64("runs")),
        Some(runs as u64)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_polls_until_agent_mode() -> Result<()> {
    let task = Arc::new(BusyTask::default());
    let persona = runtime(false);
    let scheduler = Arc::new(
        AgentScheduler::new(persona.clone(), config()).with_task(task.clone()),
    );
    let cancel = CancellationToken::new();

    let looping = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    let idle = scheduler.stats().idle_ticks;
    assert!(idle >= 2, "expected idle polling, saw {idle} idle ticks");

    persona.set_agent_mode(true);
    // The next idle poll notices the switch.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(task.runs.load(Ordering::SeqCst) >= 1);

    cancel.cancel();
    looping.await??;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_initial_delay() -> Result<()> {
    let task = Arc::new(BusyTask::default());
    let scheduler = Arc::new(
        AgentScheduler::new(runtime(true), SchedulerConfig::default()).with_task(task.clone()),
    );
    let cancel = CancellationToken::new();

    let looping = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    looping.await??;

    assert_eq!(scheduler.stats().ticks, 0);
    assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    Ok(())
}
