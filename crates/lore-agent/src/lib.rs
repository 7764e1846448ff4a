//! Persona runtime for Lore.
//!
//! This crate ties memory, sessions and inference together: it assembles
//! token-bounded prompts, drives the reply cycle for a persona, and runs
//! background tasks while the persona is otherwise idle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PersonaRuntime                                             │
//! │  - Selects memories for the upcoming turn                   │
//! │  - Assembles the prompt within the token budget             │
//! │  - Holds the single inference slot                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!       ┌──────────┐    ┌──────────┐    ┌──────────────┐
//!       │MemoryStore│   │ Ledger   │    │AgentScheduler│
//!       │(lore-mem) │   │(lore-ses)│    │ (tasks)      │
//!       └──────────┘    └──────────┘    └──────────────┘
//! ```
//!
//! # Core Components
//!
//! - [`ContextAssembler`]: packs preamble, memories and history into a budget
//! - [`PersonaRuntime`]: reply, reroll, session and maintenance operations
//! - [`AgentScheduler`]: observe/execute loop over [`AgentTask`]s
//! - [`Settings`]: component settings derived from a `LoreConfig`

pub mod assembler;
pub mod error;
pub mod persona;
pub mod runtime;
pub mod scheduler;
pub mod settings;
pub mod slot;
pub mod tasks;
pub mod template;

pub use error::{AgentError, Result};

pub use assembler::{
    AssembledPrompt, AssemblerConfig, AssemblyInput, ContextAssembler, EntryKind, HistoryScope,
    MemoryEntry, MemoryPlacement, PromptEntry,
};
pub use persona::{Cast, GroupCast, Persona, UserProfile};
pub use runtime::{
    GenerationSettings, ImportReport, MaintenanceReport, Notification, PersonaRuntime,
    PersonaRuntimeBuilder, Reply, RuntimeSettings,
};
pub use scheduler::{
    AgentScheduler, AgentTask, SchedulerConfig, SchedulerStats, TaskConfig, TaskFactory,
    TaskOutcome, TaskRegistry, TaskState, TickOutcome,
};
pub use settings::Settings;
pub use slot::{InferenceSlot, SlotGuard};
pub use tasks::{
    GOAL_RESEARCH_ID, GoalResearchTask, MAINTENANCE_ID, MaintenanceTask, REFLECTION_ID,
    ReflectionTask,
};
pub use template::{TemplateContext, resolve_template};

pub use tokio_util::sync::CancellationToken;
