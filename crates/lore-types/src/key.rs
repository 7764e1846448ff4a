//! Persona keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PersistError, Result};

/// Maximum length of a persona key.
const MAX_KEY_LEN: usize = 64;

/// The stable unique name a persona's persisted files are keyed by.
///
/// Keys double as directory names, so only ASCII alphanumerics, `-` and `_`
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonaKey(String);

impl PersonaKey {
    /// Validate and wrap a persona key.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(PersistError::InvalidKey {
                key,
                reason: "key is empty",
            });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(PersistError::InvalidKey {
                key,
                reason: "key is longer than 64 characters",
            });
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PersistError::InvalidKey {
                key,
                reason: "only ASCII letters, digits, '-' and '_' are allowed",
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PersonaKey {
    type Error = PersistError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PersonaKey> for String {
    fn from(key: PersonaKey) -> Self {
        key.0
    }
}
