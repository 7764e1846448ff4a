//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [llm]                    # inference parameters
//! [context]                # prompt budget and placement
//! [memory]                 # retrieval cutoffs
//! [memory.decay]           # staleness sweep
//! [session]                # archival threshold
//! [session.segmentation]   # raw-log import rules
//! [agent]                  # background scheduler timing
//! [agent.tasks.reflection] # per-task key/value settings
//! [paths]                  # data and log directories
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoreConfig {
    pub llm: Option<LlmSection>,
    pub context: Option<ContextSection>,
    pub memory: Option<MemorySection>,
    pub session: Option<SessionSection>,
    pub agent: Option<AgentSection>,
    pub paths: Option<PathsSection>,
}

impl LoreConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, except `[agent.tasks.*]` tables which are
    /// merged per task id.
    pub fn merge(&mut self, other: LoreConfig) {
        if other.llm.is_some() {
            self.llm = other.llm;
        }

        if other.context.is_some() {
            self.context = other.context;
        }

        if other.memory.is_some() {
            self.memory = other.memory;
        }

        if other.session.is_some() {
            self.session = other.session;
        }

        if let Some(mut agent) = other.agent {
            if let Some(previous) = self.agent.take() {
                for (id, table) in previous.tasks {
                    agent.tasks.entry(id).or_insert(table);
                }
            }
            self.agent = Some(agent);
        }

        if other.paths.is_some() {
            self.paths = other.paths;
        }
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if let Some(context) = &self.context {
            if !(0.0..=1.0).contains(&context.inline_position) {
                return Err(ConfigError::InvalidValue {
                    field: "context.inline_position".into(),
                    reason: format!("{} is outside 0.0..=1.0", context.inline_position),
                });
            }
            if context.context_window == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "context.context_window".into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if let Some(memory) = &self.memory {
            for (field, value) in [
                ("memory.natural_cutoff", memory.natural_cutoff),
                ("memory.recall_cutoff", memory.recall_cutoff),
            ] {
                if !(0.0..=2.0).contains(&value) {
                    return Err(ConfigError::InvalidValue {
                        field: field.into(),
                        reason: format!("{value} is outside the cosine distance range 0.0..=2.0"),
                    });
                }
            }
        }
        Ok(())
    }

    // Accessors returning defaults for absent sections.

    pub fn llm_or_default(&self) -> LlmSection {
        self.llm.clone().unwrap_or_default()
    }

    pub fn context_or_default(&self) -> ContextSection {
        self.context.clone().unwrap_or_default()
    }

    pub fn memory_or_default(&self) -> MemorySection {
        self.memory.clone().unwrap_or_default()
    }

    pub fn session_or_default(&self) -> SessionSection {
        self.session.clone().unwrap_or_default()
    }

    pub fn agent_or_default(&self) -> AgentSection {
        self.agent.clone().unwrap_or_default()
    }

    pub fn paths_or_default(&self) -> PathsSection {
        self.paths.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inference
// ─────────────────────────────────────────────────────────────────────────────

/// Generation parameters passed to the inference backend.
///
/// ```toml
/// [llm]
/// model = "local"
/// temperature = 0.8
/// max_reply_tokens = 300
/// stop = ["\nUser:"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub temperature: f32,
    pub max_reply_tokens: u32,
    pub stop: Vec<String>,
    /// Retries for transient backend failures.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.8,
            max_reply_tokens: 300,
            stop: Vec::new(),
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context Assembly
// ─────────────────────────────────────────────────────────────────────────────

/// Where trigger memories are placed in the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPlacementSetting {
    /// Directly after the fixed preamble.
    #[default]
    Preamble,
    /// Together with the natural memory, inside the history.
    Inline,
}

/// Which sessions the history walk may draw from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScopeSetting {
    #[default]
    CurrentSession,
    AllSessions,
}

/// Token budget and placement of prompt sections.
///
/// ```toml
/// [context]
/// context_window = 4096
/// reply_reserve = 300
/// safety_margin = 64
/// inline_position = 0.8
/// memory_placement = "preamble"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// Total context window of the model, in tokens.
    pub context_window: usize,
    /// Tokens reserved for the reply.
    pub reply_reserve: usize,
    /// Tokens held back to absorb tokenizer estimation error.
    pub safety_margin: usize,
    /// Tokens reserved for previous-session summary lines.
    pub summary_budget: usize,
    /// Relative position of the inline memory entry in the packed history.
    /// 0.0 is the oldest edge, 1.0 is just before the upcoming turn.
    pub inline_position: f32,
    pub memory_placement: MemoryPlacementSetting,
    pub history_scope: HistoryScopeSetting,
    /// Upper bound on trigger memories per prompt.
    pub max_trigger_memories: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            context_window: 4096,
            reply_reserve: 300,
            safety_margin: 64,
            summary_budget: 200,
            inline_position: 0.8,
            memory_placement: MemoryPlacementSetting::Preamble,
            history_scope: HistoryScopeSetting::CurrentSession,
            max_trigger_memories: 3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Memory retrieval configuration.
///
/// ```toml
/// [memory]
/// retrieval_enabled = true
/// natural_cutoff = 0.35
/// recall_cutoff = 0.5
/// recall_limit = 3
/// forced_after_turns = 8
///
/// [memory.decay]
/// categories = ["goal", "web_research"]
/// stale_after_days = 30
/// priority_floor = 1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Queue new records for embedding and run similarity search.
    pub retrieval_enabled: bool,
    /// Maximum cosine distance for a natural insertion winner.
    pub natural_cutoff: f32,
    /// Maximum cosine distance for trigger recall.
    pub recall_cutoff: f32,
    /// Maximum trigger memories returned by recall.
    pub recall_limit: usize,
    /// Selection rounds a forced-natural record may wait before it wins
    /// unconditionally.
    pub forced_after_turns: u32,
    pub decay: DecaySection,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            retrieval_enabled: true,
            natural_cutoff: 0.35,
            recall_cutoff: 0.5,
            recall_limit: 3,
            forced_after_turns: 8,
            decay: DecaySection::default(),
        }
    }
}

/// Decay sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecaySection {
    /// Category names eligible for decay.
    pub categories: Vec<String>,
    /// Records untouched for longer than this are stale.
    pub stale_after_days: u64,
    /// Only records with priority at or below the floor decay.
    pub priority_floor: i32,
}

impl Default for DecaySection {
    fn default() -> Self {
        Self {
            categories: vec!["goal".to_string(), "web_research".to_string()],
            stale_after_days: 30,
            priority_floor: 1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Sessions with at most this many messages are cleared instead of
    /// archived.
    pub min_messages_to_archive: usize,
    pub segmentation: SegmentationSection,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            min_messages_to_archive: 2,
            segmentation: SegmentationSection::default(),
        }
    }
}

/// Raw-log segmentation rules.
///
/// ```toml
/// [session.segmentation]
/// min_segment_messages = 35
/// gap_hours = 24
/// long_span_days = 3
/// long_span_messages = 120
/// start_patterns = ["(?i)^good morning"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSection {
    pub min_segment_messages: usize,
    pub gap_hours: u64,
    pub long_span_days: u64,
    pub long_span_messages: usize,
    /// Regular expressions marking the first message of a new session.
    /// Defaults to a greeting opener and a bracketed time announcement; an
    /// empty list disables marker splits.
    pub start_patterns: Vec<String>,
}

impl Default for SegmentationSection {
    fn default() -> Self {
        Self {
            min_segment_messages: 35,
            gap_hours: 24,
            long_span_days: 3,
            long_span_messages: 120,
            start_patterns: vec![
                r"(?i)^\s*(good\s+(morning|afternoon|evening)|hello|hi|hey|greetings)\b".to_string(),
                r"(?i)^\s*[\[*(]\s*\d{1,2}:\d{2}\s*([ap]\.?m\.?)?\s*[\])*]".to_string(),
            ],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// Background agent scheduler configuration.
///
/// ```toml
/// [agent]
/// enabled = true
/// initial_delay_secs = 30
/// task_interval_secs = 60
///
/// [agent.tasks.reflection]
/// cooldown_secs = 3600
/// min_new_messages = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Agent mode: the scheduler only runs tasks while this is on.
    pub enabled: bool,
    pub initial_delay_secs: u64,
    pub task_interval_secs: u64,
    /// Sleep between checks while agent mode is off.
    pub idle_poll_secs: u64,
    /// Seed values for each task's persisted key/value configuration.
    pub tasks: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_secs: 30,
            task_interval_secs: 60,
            idle_poll_secs: 300,
            tasks: BTreeMap::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Environment variable overriding the data directory.
const DATA_DIR_ENV: &str = "LORE_DATA_DIR";

/// Filesystem locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Root of persisted persona state. Default: platform data dir + `lore`.
    pub data_dir: Option<PathBuf>,
    /// Directory for rolling log files. Default: `<data_dir>/logs`.
    pub log_dir: Option<PathBuf>,
}

impl PathsSection {
    /// Get the effective data directory.
    ///
    /// Resolution order:
    /// 1. `LORE_DATA_DIR` environment variable
    /// 2. Configured `data_dir` value
    /// 3. Platform data directory joined with `lore`
    pub fn effective_data_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("lore"))
            .ok_or(ConfigError::NoDataDir)
    }

    /// Get the effective log directory.
    pub fn effective_log_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.effective_data_dir()?.join("logs")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
