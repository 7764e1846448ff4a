//! CLI command handlers.

pub mod import;
pub mod inspect;
pub mod sweep;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use lore_agent::{Cast, Persona, PersonaRuntime, Settings};
use lore_config::LoreConfig;
use lore_types::PersonaKey;

use crate::offline::OfflineBackend;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    pub settings: Settings,
    /// Root of persisted persona state.
    pub data_dir: PathBuf,
    /// Output as JSON for scripting.
    pub json_output: bool,
    pub verbose: bool,
}

impl Context {
    pub fn new(
        config: &LoreConfig,
        data_dir: PathBuf,
        json_output: bool,
        verbose: bool,
    ) -> Result<Self> {
        let settings = Settings::from_config(config)?;
        Ok(Self {
            settings,
            data_dir,
            json_output,
            verbose,
        })
    }

    /// Load a persona's persisted state behind the offline backend.
    pub fn open_persona(&self, name: &str) -> Result<PersonaRuntime> {
        let key = PersonaKey::new(name)?;
        let cast = Cast::Single(Persona::new(key, name));
        Ok(PersonaRuntime::builder(cast, Arc::new(OfflineBackend))
            .with_settings(self.settings.runtime.clone())
            .with_data_dir(&self.data_dir)
            .build())
    }
}
