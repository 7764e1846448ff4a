//! Splitting a flat message log into sessions.
//!
//! Imported logs have no session boundaries. A new session starts once the
//! current one holds at least `min_segment_messages` messages and one of
//! these holds for the next message:
//!
//! - the gap since the previous message is at least `gap`
//! - the segment spans more than `long_span` and holds more than
//!   `long_span_messages` messages
//! - the message matches a session-start pattern
//!
//! Malformed timestamps (at or before the Unix epoch) are repaired to the
//! previous message's time plus one second before splitting. Malformed
//! entries ahead of the first valid one count back from it a second apart.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, SessionError};
use crate::types::{ChatMessage, MessageRole};

/// Session-start patterns used when none are configured: a greeting opener
/// or a bracketed time announcement such as `[7:30 am]`.
pub const DEFAULT_START_PATTERNS: &[&str] = &[
    r"(?i)^\s*(good\s+(morning|afternoon|evening)|hello|hi|hey|greetings)\b",
    r"(?i)^\s*[\[*(]\s*\d{1,2}:\d{2}\s*([ap]\.?m\.?)?\s*[\])*]",
];

/// Rules for [`segment_raw_log`].
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub min_segment_messages: usize,
    pub gap: Duration,
    pub long_span: Duration,
    pub long_span_messages: usize,
    pub start_patterns: Vec<Regex>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_segment_messages: 35,
            gap: Duration::days(1),
            long_span: Duration::days(3),
            long_span_messages: 120,
            start_patterns: DEFAULT_START_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl SegmentConfig {
    /// Compile session-start patterns.
    pub fn with_start_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        self.start_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| SessionError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    fn starts_session(&self, message: &ChatMessage) -> bool {
        self.start_patterns.iter().any(|p| p.is_match(&message.content))
    }
}

fn is_malformed(timestamp: DateTime<Utc>) -> bool {
    timestamp.timestamp() <= 0
}

/// Replace malformed timestamps with the previous message's time plus one
/// second. The `k` malformed entries ahead of the first valid one are placed
/// `k..1` seconds before it, so the repaired log is strictly increasing
/// wherever it was repaired.
pub fn repair_timestamps(messages: &mut [ChatMessage]) -> usize {
    let Some(first_valid) = messages.iter().position(|m| !is_malformed(m.timestamp)) else {
        return 0;
    };

    let anchor = messages[first_valid].timestamp;
    for (i, message) in messages[..first_valid].iter_mut().enumerate() {
        let back = i64::try_from(first_valid - i).unwrap_or(i64::MAX);
        message.timestamp = anchor - Duration::seconds(back);
    }

    let mut repaired = first_valid;
    let mut previous = anchor;
    for message in messages[first_valid..].iter_mut() {
        if is_malformed(message.timestamp) {
            message.timestamp = previous + Duration::seconds(1);
            repaired += 1;
        }
        previous = message.timestamp;
    }
    repaired
}

/// Split a chronological message log into session-sized segments.
pub fn segment_raw_log(mut messages: Vec<ChatMessage>, config: &SegmentConfig) -> Vec<Vec<ChatMessage>> {
    let repaired = repair_timestamps(&mut messages);
    if repaired > 0 {
        tracing::debug!(repaired, "Repaired malformed timestamps");
    }

    let mut segments: Vec<Vec<ChatMessage>> = Vec::new();
    let mut current: Vec<ChatMessage> = Vec::new();

    for message in messages {
        if let (Some(first), Some(last)) = (current.first(), current.last())
            && current.len() >= config.min_segment_messages
        {
            let gap = message.timestamp - last.timestamp;
            let span = message.timestamp - first.timestamp;
            let split = gap >= config.gap
                || (span > config.long_span && current.len() > config.long_span_messages)
                || config.starts_session(&message);
            if split {
                segments.push(std::mem::take(&mut current));
            }
        }
        current.push(message);
    }
    if !current.is_empty() {
        segments.push(current);
    }

    tracing::debug!(segments = segments.len(), "Segmented raw log");
    segments
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw log parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawLogEntry {
    role: MessageRole,
    #[serde(default)]
    author: String,
    content: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    hidden: bool,
}

/// Parse a JSON-lines log, one message object per line.
///
/// Returns the messages and the number of lines that could not be parsed.
/// Entries without a timestamp get the epoch and are repaired during
/// segmentation.
pub fn parse_raw_log(text: &str) -> (Vec<ChatMessage>, usize) {
    let mut messages = Vec::new();
    let mut skipped = 0;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawLogEntry>(line) {
            Ok(entry) => messages.push(
                ChatMessage::new(entry.role, entry.author, entry.content)
                    .with_timestamp(entry.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
                    .with_hidden(entry.hidden),
            ),
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "Skipping unparseable log line");
                skipped += 1;
            }
        }
    }
    (messages, skipped)
}
