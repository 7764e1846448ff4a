//! Personas and the cast taking part in a conversation.

use serde::{Deserialize, Serialize};

use lore_types::PersonaKey;

use crate::error::{AgentError, Result};

/// A bot participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique name; keys the persisted state directory.
    pub key: PersonaKey,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    /// Standing instructions placed at the top of every prompt.
    #[serde(default)]
    pub instructions: String,
}

impl Persona {
    pub fn new(key: PersonaKey, display_name: impl Into<String>) -> Self {
        Self {
            key,
            display_name: display_name.into(),
            bio: String::new(),
            instructions: String::new(),
        }
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = bio.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

/// The human side of the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub bio: String,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bio: String::new(),
        }
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = bio.into();
        self
    }
}

/// Members of a group chat and which one speaks next.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCast {
    members: Vec<Persona>,
    active: usize,
}

impl GroupCast {
    pub fn members(&self) -> &[Persona] {
        &self.members
    }

    pub fn active_index(&self) -> usize {
        self.active
    }
}

/// Who the assistant side of the conversation is.
#[derive(Debug, Clone, PartialEq)]
pub enum Cast {
    Single(Persona),
    Group(GroupCast),
}

impl Cast {
    /// Build a group cast. Fails when `members` is empty or `active` is out
    /// of range.
    pub fn group(members: Vec<Persona>, active: usize) -> Result<Self> {
        if members.is_empty() {
            return Err(AgentError::InvalidCast("group has no members".into()));
        }
        if active >= members.len() {
            return Err(AgentError::InvalidCast(format!(
                "active member {active} out of range for {} members",
                members.len()
            )));
        }
        Ok(Self::Group(GroupCast { members, active }))
    }

    /// The persona whose turn it is.
    pub fn active(&self) -> &Persona {
        match self {
            Self::Single(persona) => persona,
            Self::Group(group) => &group.members[group.active],
        }
    }

    /// Hand the next turn to another group member.
    pub fn set_active(&mut self, index: usize) -> Result<()> {
        match self {
            Self::Single(_) if index == 0 => Ok(()),
            Self::Single(_) => Err(AgentError::InvalidCast(
                "a single persona has only member 0".into(),
            )),
            Self::Group(group) if index < group.members.len() => {
                group.active = index;
                Ok(())
            }
            Self::Group(group) => Err(AgentError::InvalidCast(format!(
                "active member {index} out of range for {} members",
                group.members.len()
            ))),
        }
    }

    pub fn members(&self) -> &[Persona] {
        match self {
            Self::Single(persona) => std::slice::from_ref(persona),
            Self::Group(group) => &group.members,
        }
    }

    /// Biography text for `{{charbio}}`.
    ///
    /// A group lists every member so each knows who else is present.
    pub fn character_text(&self) -> String {
        match self {
            Self::Single(persona) => persona.bio.clone(),
            Self::Group(group) => group
                .members
                .iter()
                .map(|m| {
                    if m.bio.is_empty() {
                        m.display_name.clone()
                    } else {
                        format!("{}: {}", m.display_name, m.bio)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
