//! Shared types for the Lore persona runtime.
//!
//! Every persona owns three independently persisted documents (memories,
//! sessions, scheduler state). This crate holds the pieces all of them share:
//! - [`persist`]: JSON load/save with `.bak` rotation and default-on-missing
//! - [`PersonaKey`]: the validated stable name used to key a persona's files

pub mod error;
pub mod key;
pub mod persist;

pub use error::{PersistError, Result};
pub use key::PersonaKey;
pub use persist::{backup_path, load_json_or_default, save_json};
