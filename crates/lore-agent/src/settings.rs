//! Mapping from the TOML configuration to component settings.

use std::time::Duration;

use lore_config::{HistoryScopeSetting, LoreConfig, MemoryPlacementSetting};
use lore_memory::{DecayConfig, MemoryCategory, MemoryConfig};
use lore_session::{LedgerConfig, SegmentConfig, SummarizerConfig};

use crate::assembler::{AssemblerConfig, HistoryScope, MemoryPlacement};
use crate::error::Result;
use crate::runtime::{GenerationSettings, RuntimeSettings};
use crate::scheduler::{SchedulerConfig, TaskConfig};

/// Every component setting derived from one [`LoreConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub runtime: RuntimeSettings,
    pub segment: SegmentConfig,
    pub scheduler: SchedulerConfig,
    /// Initial agent mode.
    pub agent_enabled: bool,
}

impl Settings {
    /// Fails only when a session-start pattern is not a valid regex.
    pub fn from_config(config: &LoreConfig) -> Result<Self> {
        let llm = config.llm_or_default();
        let context = config.context_or_default();
        let memory = config.memory_or_default();
        let session = config.session_or_default();
        let agent = config.agent_or_default();

        let generation = GenerationSettings {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_reply_tokens: llm.max_reply_tokens,
            stop: llm.stop.clone(),
            max_retries: llm.max_retries,
            retry_backoff: Duration::from_millis(llm.retry_backoff_ms),
        };

        let assembler = AssemblerConfig {
            context_window: context.context_window,
            reply_reserve: context.reply_reserve,
            safety_margin: context.safety_margin,
            summary_budget: context.summary_budget,
            inline_position: context.inline_position,
            memory_placement: match context.memory_placement {
                MemoryPlacementSetting::Preamble => MemoryPlacement::Preamble,
                MemoryPlacementSetting::Inline => MemoryPlacement::Inline,
            },
            history_scope: match context.history_scope {
                HistoryScopeSetting::CurrentSession => HistoryScope::CurrentSession,
                HistoryScopeSetting::AllSessions => HistoryScope::AllSessions,
            },
            max_trigger_memories: context.max_trigger_memories,
        };

        let memory_config = MemoryConfig {
            retrieval_enabled: memory.retrieval_enabled,
            natural_cutoff: memory.natural_cutoff,
            recall_cutoff: memory.recall_cutoff,
            recall_limit: memory.recall_limit,
            forced_after_turns: memory.forced_after_turns,
            decay: DecayConfig {
                categories: memory
                    .decay
                    .categories
                    .iter()
                    .map(|name| MemoryCategory::from_name(name))
                    .collect(),
                stale_after: chrono::Duration::days(days(memory.decay.stale_after_days)),
                priority_floor: memory.decay.priority_floor,
            },
        };

        let segmentation = &session.segmentation;
        let segment = SegmentConfig {
            min_segment_messages: segmentation.min_segment_messages,
            gap: chrono::Duration::hours(hours(segmentation.gap_hours)),
            long_span: chrono::Duration::days(days(segmentation.long_span_days)),
            long_span_messages: segmentation.long_span_messages,
            start_patterns: Vec::new(),
        }
        .with_start_patterns(&segmentation.start_patterns)?;

        let summarizer = SummarizerConfig {
            model: llm.model.clone(),
            ..SummarizerConfig::default()
        };

        let scheduler = SchedulerConfig {
            initial_delay: Duration::from_secs(agent.initial_delay_secs),
            task_interval: Duration::from_secs(agent.task_interval_secs),
            idle_poll: Duration::from_secs(agent.idle_poll_secs),
            task_seeds: agent
                .tasks
                .iter()
                .map(|(id, values)| (id.clone(), TaskConfig::from(values.clone())))
                .collect(),
        };

        Ok(Self {
            runtime: RuntimeSettings {
                generation,
                assembler,
                memory: memory_config,
                ledger: LedgerConfig {
                    min_messages_to_archive: session.min_messages_to_archive,
                },
                summarizer,
                ..RuntimeSettings::default()
            },
            segment,
            scheduler,
            agent_enabled: agent.enabled,
        })
    }
}

// Keep durations well inside chrono's range.
fn hours(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX).min(24 * 365 * 1000)
}

fn days(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX).min(365 * 1000)
}
