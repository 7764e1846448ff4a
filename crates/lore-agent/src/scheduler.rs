//! Background agent scheduler.
//!
//! One scheduler per persona. It wakes on a timer and, while agent mode is
//! on, runs at most one task per tick:
//!
//! ```text
//! initial_delay
//!     │
//!     ▼
//! ┌────────────┐ agent mode off ┌──────────────┐
//! │    tick    │───────────────▶│ idle_poll    │──┐
//! └────────────┘                └──────────────┘  │
//!     │ first task whose observe() is true        │
//!     ▼                                           │
//! execute (errors and panics contained)           │
//!     │                                           │
//!     ▼                                           │
//! task_interval ◀─────────────────────────────────┘
//! ```
//!
//! Each task keeps its own key/value [`TaskConfig`] (cooldowns, last run,
//! counters). Configurations are loaded from `agent.json` when the
//! scheduler is built and written back on shutdown.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::runtime::PersonaRuntime;

/// Version written into persisted agent documents.
const AGENT_STATE_VERSION: u32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Task configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted key/value configuration of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskConfig {
    values: BTreeMap<String, Value>,
}

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get_u64(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Read an RFC 3339 timestamp.
    pub fn get_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn set_datetime(&mut self, key: impl Into<String>, at: DateTime<Utc>) {
        self.set(key, at.to_rfc3339());
    }

    /// Add one to a counter.
    pub fn increment(&mut self, key: &str) -> u64 {
        let next = self.u64_or(key, 0) + 1;
        self.set(key, next);
        next
    }

    /// Whether at least `cooldown_secs` passed since the time stored under
    /// `key`. A missing timestamp counts as elapsed.
    pub fn cooldown_elapsed(&self, key: &str, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        match self.get_datetime(key) {
            Some(last) => now - last >= chrono::Duration::seconds(cooldown_secs as i64),
            None => true,
        }
    }

    /// Overlay `other` on top of this configuration.
    pub fn merge(&mut self, other: &TaskConfig) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for TaskConfig {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task trait
// ─────────────────────────────────────────────────────────────────────────────

/// What a task run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub memorized: usize,
    pub summary: String,
}

impl TaskOutcome {
    pub fn new(memorized: usize, summary: impl Into<String>) -> Self {
        Self {
            memorized,
            summary: summary.into(),
        }
    }

    /// Nothing was done this time.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(0, reason)
    }
}

/// A pluggable background behavior.
#[async_trait]
pub trait AgentTask: Send + Sync {
    /// Stable id; keys the task's persisted configuration.
    fn id(&self) -> &str;

    /// Configuration used the first time the task runs.
    fn default_config(&self) -> TaskConfig {
        TaskConfig::default()
    }

    /// Whether the task wants to run now. Must not change any state.
    async fn observe(&self, persona: &PersonaRuntime, config: &TaskConfig) -> bool;

    /// Do the work. Long waits should watch `cancel`.
    async fn execute(
        &self,
        persona: &PersonaRuntime,
        config: &mut TaskConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome>;
}

/// Builds a task instance.
pub type TaskFactory = Box<dyn Fn() -> Arc<dyn AgentTask> + Send + Sync>;

/// Task factories keyed by id.
#[derive(Default)]
pub struct TaskRegistry {
    factories: BTreeMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in task.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(crate::tasks::GOAL_RESEARCH_ID, || {
            Arc::new(crate::tasks::GoalResearchTask) as Arc<dyn AgentTask>
        });
        registry.register(crate::tasks::MAINTENANCE_ID, || {
            Arc::new(crate::tasks::MaintenanceTask) as Arc<dyn AgentTask>
        });
        registry.register(crate::tasks::REFLECTION_ID, || {
            Arc::new(crate::tasks::ReflectionTask) as Arc<dyn AgentTask>
        });
        registry
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn AgentTask> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    pub fn create(&self, id: &str) -> Result<Arc<dyn AgentTask>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| AgentError::UnknownTask(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduler timing and task seeds.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub initial_delay: Duration,
    pub task_interval: Duration,
    /// Sleep between checks while agent mode is off.
    pub idle_poll: Duration,
    /// Configured values per task id; they override persisted values.
    pub task_seeds: BTreeMap<String, TaskConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            task_interval: Duration::from_secs(60),
            idle_poll: Duration::from_secs(300),
            task_seeds: BTreeMap::new(),
        }
    }
}

/// Where a task is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Observed,
    Executing,
}

/// Counters for inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    /// Ticks skipped because agent mode was off.
    pub idle_ticks: u64,
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Agent mode was off.
    Disabled,
    /// No task wanted to run.
    Idle,
    Executed { task: String, outcome: TaskOutcome },
    Failed { task: String, error: String },
    Panicked { task: String },
}

struct TaskSlot {
    task: Arc<dyn AgentTask>,
    config: Mutex<TaskConfig>,
    state: Mutex<TaskState>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AgentStateDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    tasks: BTreeMap<String, TaskConfig>,
}

/// Runs background tasks for one persona.
pub struct AgentScheduler {
    persona: Arc<PersonaRuntime>,
    config: SchedulerConfig,
    tasks: Vec<TaskSlot>,
    state_path: Option<PathBuf>,
    persisted: BTreeMap<String, TaskConfig>,
    stats: Mutex<SchedulerStats>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl AgentScheduler {
    /// Create a scheduler. Task configurations persisted in the persona's
    /// `agent.json` are loaded now and applied as tasks register.
    pub fn new(persona: Arc<PersonaRuntime>, config: SchedulerConfig) -> Self {
        let state_path = persona.paths().map(|p| p.agent());
        let persisted = match &state_path {
            Some(path) => load_state(path),
            None => BTreeMap::new(),
        };
        Self {
            persona,
            config,
            tasks: Vec::new(),
            state_path,
            persisted,
            stats: Mutex::new(SchedulerStats::default()),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Register a task. Its configuration is the task default, overlaid by
    /// the persisted values, overlaid by the configured seed.
    pub fn with_task(mut self, task: Arc<dyn AgentTask>) -> Self {
        let id = task.id().to_string();
        let mut config = task.default_config();
        if let Some(persisted) = self.persisted.get(&id) {
            config.merge(persisted);
        }
        if let Some(seed) = self.config.task_seeds.get(&id) {
            config.merge(seed);
        }
        debug!(task = %id, keys = config.len(), "Registered agent task");
        self.tasks.push(TaskSlot {
            task,
            config: Mutex::new(config),
            state: Mutex::new(TaskState::Idle),
        });
        self
    }

    /// Register every task in `registry`, in id order.
    pub fn with_registry(mut self, registry: &TaskRegistry) -> Self {
        for id in registry.ids() {
            match registry.create(id) {
                Ok(task) => self = self.with_task(task),
                Err(e) => warn!(task = %id, error = %e, "Failed to create agent task"),
            }
        }
        self
    }

    pub fn persona(&self) -> &Arc<PersonaRuntime> {
        &self.persona
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    pub fn task_config(&self, id: &str) -> Option<TaskConfig> {
        self.slot(id).map(|s| s.config.lock().clone())
    }

    pub fn task_state(&self, id: &str) -> Option<TaskState> {
        self.slot(id).map(|s| *s.state.lock())
    }

    fn slot(&self, id: &str) -> Option<&TaskSlot> {
        self.tasks.iter().find(|s| s.task.id() == id)
    }

    /// Run until `cancel` fires, then persist task configurations.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            persona = %self.persona.key(),
            tasks = self.tasks.len(),
            "Agent scheduler started"
        );

        if sleep_or_cancel(self.config.initial_delay, &cancel).await {
            loop {
                let pause = match self.tick(&cancel).await {
                    TickOutcome::Disabled => self.config.idle_poll,
                    _ => self.config.task_interval,
                };
                if !sleep_or_cancel(pause, &cancel).await {
                    break;
                }
            }
        }

        let saved = self.persist();
        info!(persona = %self.persona.key(), stats = ?self.stats(), "Agent scheduler stopped");
        saved
    }

    /// Consider every task once and run the first one that wants to.
    ///
    /// Ticks never overlap: a concurrent call waits for the running one.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickOutcome {
        let _tick = self.tick_lock.lock().await;
        self.stats.lock().ticks += 1;

        if !self.persona.agent_mode() {
            self.stats.lock().idle_ticks += 1;
            return TickOutcome::Disabled;
        }

        for slot in &self.tasks {
            if cancel.is_cancelled() {
                break;
            }
            let snapshot = slot.config.lock().clone();
            if !slot.task.observe(&self.persona, &snapshot).await {
                continue;
            }
            *slot.state.lock() = TaskState::Observed;
            return self.execute(slot, snapshot, cancel).await;
        }
        TickOutcome::Idle
    }

    async fn execute(
        &self,
        slot: &TaskSlot,
        mut config: TaskConfig,
        cancel: &CancellationToken,
    ) -> TickOutcome {
        let id = slot.task.id().to_string();
        *slot.state.lock() = TaskState::Executing;
        debug!(task = %id, "Executing agent task");

        let result = AssertUnwindSafe(slot.task.execute(&self.persona, &mut config, cancel))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => {
                *slot.config.lock() = config;
                self.stats.lock().executed += 1;
                info!(
                    task = %id,
                    memorized = outcome.memorized,
                    summary = %outcome.summary,
                    "Agent task finished"
                );
                TickOutcome::Executed { task: id, outcome }
            }
            Ok(Err(e)) => {
                // Bookkeeping written before the failure is kept.
                *slot.config.lock() = config;
                self.stats.lock().failed += 1;
                warn!(task = %id, error = %e, "Agent task failed");
                TickOutcome::Failed {
                    task: id,
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                self.stats.lock().panicked += 1;
                warn!(task = %id, panic = %panic_message(panic.as_ref()), "Agent task panicked");
                TickOutcome::Panicked { task: id }
            }
        };

        *slot.state.lock() = TaskState::Idle;
        outcome
    }

    /// Write every task configuration to `agent.json`.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let mut tasks = self.persisted.clone();
        for slot in &self.tasks {
            tasks.insert(slot.task.id().to_string(), slot.config.lock().clone());
        }
        let doc = AgentStateDocument {
            version: AGENT_STATE_VERSION,
            tasks,
        };
        lore_types::save_json(path, &doc, true).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to save agent state");
            AgentError::from(e)
        })
    }
}

impl std::fmt::Debug for AgentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentScheduler")
            .field("persona", &self.persona.key())
            .field("config", &self.config)
            .field(
                "tasks",
                &self.tasks.iter().map(|s| s.task.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn load_state(path: &Path) -> BTreeMap<String, TaskConfig> {
    let doc: AgentStateDocument = lore_types::load_json_or_default(path);
    if doc.version > AGENT_STATE_VERSION {
        warn!(
            path = %path.display(),
            version = doc.version,
            supported = AGENT_STATE_VERSION,
            "Agent state was written by a newer version"
        );
    }
    doc.tasks
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{Cast, Persona};
    use lore_llm::MockBackend;
    use lore_types::PersonaKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn persona(agent_mode: bool) -> Arc<PersonaRuntime> {
        let cast = Cast::Single(Persona::new(PersonaKey::new("aria").unwrap(), "Aria"));
        Arc::new(
            PersonaRuntime::builder(cast, Arc::new(MockBackend::repeating("ok")))
                .with_agent_mode(agent_mode)
                .build(),
        )
    }

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
        runnable: bool,
    }

    #[async_trait]
    impl AgentTask for Counting {
        fn id(&self) -> &str {
            "counting"
        }

        async fn observe(&self, _: &PersonaRuntime, _: &TaskConfig) -> bool {
            self.runnable
        }

        async fn execute(
            &self,
            _: &PersonaRuntime,
            config: &mut TaskConfig,
            _: &CancellationToken,
        ) -> Result<TaskOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            config.increment("runs");
            Ok(TaskOutcome::new(0, "counted"))
        }
    }

    struct Failing;

    #[async_trait]
    impl AgentTask for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        async fn observe(&self, _: &PersonaRuntime, _: &TaskConfig) -> bool {
            true
        }

        async fn execute(
            &self,
            _: &PersonaRuntime,
            config: &mut TaskConfig,
            _: &CancellationToken,
        ) -> Result<TaskOutcome> {
            config.set("attempted", true);
            Err(AgentError::task("failing", "boom"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl AgentTask for Panicking {
        fn id(&self) -> &str {
            "panicking"
        }

        async fn observe(&self, _: &PersonaRuntime, _: &TaskConfig) -> bool {
            true
        }

        async fn execute(
            &self,
            _: &PersonaRuntime,
            _: &mut TaskConfig,
            _: &CancellationToken,
        ) -> Result<TaskOutcome> {
            panic!("task exploded");
        }
    }

    #[test]
    fn test_task_config_accessors() {
        let now = Utc::now();
        let mut config = TaskConfig::new().with("cooldown_secs", 60u64);

        assert_eq!(config.u64_or("cooldown_secs", 1), 60);
        assert_eq!(config.u64_or("missing", 7), 7);
        assert!(config.cooldown_elapsed("last_run", 60, now));

        config.set_datetime("last_run", now - chrono::Duration::seconds(30));
        assert!(!config.cooldown_elapsed("last_run", 60, now));
        assert!(config.cooldown_elapsed("last_run", 20, now));

        assert_eq!(config.increment("runs"), 1);
        assert_eq!(config.increment("runs"), 2);
    }

    #[test]
    fn test_task_config_serde_is_flat() {
        let config = TaskConfig::new().with("cooldown_secs", 60u64);
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"{"cooldown_secs":60}"#);
    }

    #[test]
    fn test_registry() {
        let registry = TaskRegistry::with_builtin();
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["goal_research", "maintenance", "reflection"]);
        assert_eq!(registry.create("reflection").unwrap().id(), "reflection");
        assert!(matches!(
            registry.create("nope"),
            Err(AgentError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_tick_disabled_without_agent_mode() {
        let task = Arc::new(Counting {
            runnable: true,
            ..Default::default()
        });
        let scheduler = AgentScheduler::new(persona(false), SchedulerConfig::default())
            .with_task(task.clone());

        assert_eq!(scheduler.tick(&CancellationToken::new()).await, TickOutcome::Disabled);
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().idle_ticks, 1);
    }

    #[tokio::test]
    async fn test_first_runnable_task_only() {
        let idle = Arc::new(Counting::default());
        let first = Arc::new(Counting {
            runnable: true,
            ..Default::default()
        });
        let scheduler = AgentScheduler::new(persona(true), SchedulerConfig::default())
            .with_task(idle.clone())
            .with_task(first.clone())
            .with_task(Arc::new(Failing));

        let outcome = scheduler.tick(&CancellationToken::new()).await;

        assert!(matches!(outcome, TickOutcome::Executed { .. }));
        assert_eq!(first.runs.load(Ordering::SeqCst), 1);
        assert_eq!(idle.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.task_state("counting"), Some(TaskState::Idle));
    }

    #[tokio::test]
    async fn test_failure_contained_and_bookkeeping_kept() {
        let scheduler =
            AgentScheduler::new(persona(true), SchedulerConfig::default()).with_task(Arc::new(Failing));

        let outcome = scheduler.tick(&CancellationToken::new()).await;

        assert!(matches!(outcome, TickOutcome::Failed { .. }));
        assert_eq!(scheduler.stats().failed, 1);
        let config = scheduler.task_config("failing").unwrap();
        assert_eq!(config.get("attempted"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_panic_contained() {
        let scheduler = AgentScheduler::new(persona(true), SchedulerConfig::default())
            .with_task(Arc::new(Panicking));

        let outcome = scheduler.tick(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            TickOutcome::Panicked {
                task: "panicking".into()
            }
        );
        assert_eq!(scheduler.stats().panicked, 1);
        assert_eq!(scheduler.task_state("panicking"), Some(TaskState::Idle));

        // The scheduler keeps working after a panic.
        scheduler.tick(&CancellationToken::new()).await;
        assert_eq!(scheduler.stats().panicked, 2);
    }

    #[tokio::test]
    async fn test_seed_overrides_persisted_and_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cast = Cast::Single(Persona::new(PersonaKey::new("aria").unwrap(), "Aria"));
        let runtime = Arc::new(
            PersonaRuntime::builder(cast, Arc::new(MockBackend::repeating("ok")))
                .with_data_dir(dir.path())
                .with_agent_mode(true)
                .build(),
        );

        let task = Arc::new(Counting {
            runnable: true,
            ..Default::default()
        });
        let scheduler = AgentScheduler::new(runtime.clone(), SchedulerConfig::default())
            .with_task(task.clone());
        scheduler.tick(&CancellationToken::new()).await;
        scheduler.tick(&CancellationToken::new()).await;
        scheduler.persist().unwrap();

        let mut seeds = BTreeMap::new();
        seeds.insert("counting".to_string(), TaskConfig::new().with("label", "seeded"));
        let reloaded = AgentScheduler::new(
            runtime,
            SchedulerConfig {
                task_seeds: seeds,
                ..Default::default()
            },
        )
        .with_task(task);

        let config = reloaded.task_config("counting").unwrap();
        assert_eq!(config.get_u64("runs"), Some(2));
        assert_eq!(config.get_str("label"), Some("seeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let task = Arc::new(Counting {
            runnable: true,
            ..Default::default()
        });
        let scheduler = Arc::new(
            AgentScheduler::new(
                persona(true),
                SchedulerConfig {
                    initial_delay: Duration::from_secs(5),
                    task_interval: Duration::from_secs(10),
                    ..Default::default()
                },
            )
            .with_task(task.clone()),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        // Ticks at 5s, 15s and 25s.
        tokio::time::sleep(Duration::from_secs(26)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(task.runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.stats().executed, 3);
    }
}
