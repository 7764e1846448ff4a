//! Long-term memory for Lore personas.
//!
//! Each persona owns one [`MemoryStore`]: a durable collection of
//! [`MemoryRecord`]s that the foreground prompt pipeline reads from and the
//! background agent writes into.
//!
//! # Selection
//!
//! ```text
//!                ┌──────────────────────────────┐
//!  input text ──▶│ eligible_for_natural_insertion│──▶ at most one winner
//!                └──────────────────────────────┘
//!                ┌──────────────────────────────┐
//!  input text ──▶│ recall (keywords + similarity)│──▶ ranked trigger records
//!                └──────────────────────────────┘
//!  after the turn succeeds: commit(id, used) for every offered record and
//!  mark_passed_over for the natural records that lost
//! ```
//!
//! Similarity goes through the [`RetrievalAdapter`], which wraps the
//! embedding and vector-search collaborators from `lore-llm`.

pub mod config;
pub mod error;
pub mod retrieval;
pub mod store;
pub mod types;

pub use config::{DecayConfig, MemoryConfig};
pub use error::{MemoryError, Result};
pub use retrieval::RetrievalAdapter;
pub use store::{CommitOutcome, MemoryStore, NaturalSelection, StoreStats};
pub use types::{DEFAULT_PRIORITY, InsertionPolicy, MemoryCategory, MemoryId, MemoryRecord};
