//! Periodic memory upkeep.
//!
//! Decays stale memories, embeds records queued since the last pass and
//! backfills missing session summaries when the inference slot is free.

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::runtime::PersonaRuntime;
use crate::scheduler::{AgentTask, TaskConfig, TaskOutcome};

pub const MAINTENANCE_ID: &str = "maintenance";

const LAST_RUN: &str = "last_run";
const COOLDOWN_SECS: &str = "cooldown_secs";
const RUNS: &str = "runs";

const DEFAULT_COOLDOWN_SECS: u64 = 600;

/// Runs [`PersonaRuntime::maintenance`] once per cooldown.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceTask;

#[async_trait]
impl AgentTask for MaintenanceTask {
    fn id(&self) -> &str {
        MAINTENANCE_ID
    }

    fn default_config(&self) -> TaskConfig {
        TaskConfig::new().with(COOLDOWN_SECS, DEFAULT_COOLDOWN_SECS)
    }

    async fn observe(&self, _persona: &PersonaRuntime, config: &TaskConfig) -> bool {
        config.cooldown_elapsed(
            LAST_RUN,
            config.u64_or(COOLDOWN_SECS, DEFAULT_COOLDOWN_SECS),
            Utc::now(),
        )
    }

    async fn execute(
        &self,
        persona: &PersonaRuntime,
        config: &mut TaskConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        config.set_datetime(LAST_RUN, Utc::now());
        let report = persona.maintenance(cancel).await?;
        config.increment(RUNS);

        Ok(TaskOutcome::new(
            0,
            format!(
                "decayed {}, embedded {}, summarized {}",
                report.decayed, report.embedded, report.summarized
            ),
        ))
    }
}
