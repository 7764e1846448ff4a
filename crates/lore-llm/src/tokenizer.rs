//! Token counting.

use std::sync::Arc;

/// Counts the tokens a text costs in a prompt.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// A tokenizer that can be shared across threads.
pub type SharedTokenizer = Arc<dyn Tokenizer>;

/// Estimates tokens from character count.
///
/// Rough estimate: ~4 characters per token for English text. Any non-empty
/// text costs at least one token.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioTokenizer {
    chars_per_token: usize,
}

impl CharRatioTokenizer {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioTokenizer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Tokenizer for CharRatioTokenizer {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token)
    }
}
