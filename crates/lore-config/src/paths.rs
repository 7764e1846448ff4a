//! Per-persona data file layout.
//!
//! ```text
//! <data_dir>/
//! └── personas/
//!     └── <persona key>/
//!         ├── memories.json
//!         ├── sessions.json
//!         └── agent.json
//! ```

use std::path::{Path, PathBuf};

use lore_types::PersonaKey;

/// Resolved locations of one persona's persisted files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaPaths {
    root: PathBuf,
}

impl PersonaPaths {
    pub fn new(data_dir: &Path, key: &PersonaKey) -> Self {
        Self {
            root: data_dir.join("personas").join(key.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memories(&self) -> PathBuf {
        self.root.join("memories.json")
    }

    pub fn sessions(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    /// Persisted agent task configurations.
    pub fn agent(&self) -> PathBuf {
        self.root.join("agent.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let key = PersonaKey::new("aria").unwrap();
        let paths = PersonaPaths::new(Path::new("/data"), &key);

        assert_eq!(paths.root(), Path::new("/data/personas/aria"));
        assert_eq!(paths.memories(), PathBuf::from("/data/personas/aria/memories.json"));
        assert_eq!(paths.sessions(), PathBuf::from("/data/personas/aria/sessions.json"));
        assert_eq!(paths.agent(), PathBuf::from("/data/personas/aria/agent.json"));
    }
}
