//! Configuration system for Lore.
//!
//! Provides TOML-based configuration with:
//! - Optional sections for inference, context budgeting, memory, sessions
//!   and the background agent (`[llm]`, `[context]`, `[memory]`, ...)
//! - Per-task key/value tables (`[agent.tasks.<id>]`)
//! - Config file layering (user config dir + project-local overrides)
//! - Per-persona data file layout under the data directory

pub mod discovery;
pub mod error;
pub mod paths;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use paths::PersonaPaths;
pub use types::*;
