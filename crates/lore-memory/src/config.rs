//! Memory store configuration.

use chrono::Duration;

use crate::types::MemoryCategory;

/// Tunables for selection and decay.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Queue new records for embedding and run similarity search.
    pub retrieval_enabled: bool,
    /// Maximum cosine distance for a natural insertion winner.
    pub natural_cutoff: f32,
    /// Maximum cosine distance for trigger recall.
    pub recall_cutoff: f32,
    pub recall_limit: usize,
    /// A forced-natural record that waited this many rounds wins outright.
    pub forced_after_turns: u32,
    pub decay: DecayConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retrieval_enabled: true,
            natural_cutoff: 0.35,
            recall_cutoff: 0.5,
            recall_limit: 3,
            forced_after_turns: 8,
            decay: DecayConfig::default(),
        }
    }
}

/// Which records the decay sweep may remove.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayConfig {
    pub categories: Vec<MemoryCategory>,
    pub stale_after: Duration,
    /// Records with a priority above the floor never decay.
    pub priority_floor: i32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            categories: vec![MemoryCategory::Goal, MemoryCategory::WebResearch],
            stale_after: Duration::days(30),
            priority_floor: 1,
        }
    }
}
