//! Chat history for Lore personas.
//!
//! A [`SessionLedger`] holds one current [`ChatSession`] and the archive of
//! sealed ones. Ending a session hands it to a [`SessionSummarizer`]; the
//! resulting [`SessionSummary`] travels with the sealed session and feeds
//! long-term memory.
//!
//! Imported logs without session boundaries are split with
//! [`segment_raw_log`].

pub mod error;
pub mod ledger;
pub mod segment;
pub mod summarizer;
pub mod types;

pub use error::{Result, SessionError};
pub use ledger::{LedgerConfig, SessionLedger, SessionTransition};
pub use segment::{DEFAULT_START_PATTERNS, SegmentConfig, parse_raw_log, repair_timestamps, segment_raw_log};
pub use summarizer::{
    LlmSummarizer, SessionSummarizer, SummarizedSession, SummarizerConfig, parse_summary,
};
pub use types::{
    ChatMessage, ChatSession, MAX_GOALS, MessageId, MessageRole, SessionId, SessionKind,
    SessionSummary,
};
