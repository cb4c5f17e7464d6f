//! Input token estimation for gateway budget enforcement.
//!
//! Text is measured by a [`Tokenizer`]; the default is a character heuristic
//! (~4 bytes per token, rounded up). Images are priced by detail level and,
//! when known, pixel dimensions:
//!
//! - `low`: a flat 85 tokens
//! - `high`/`medium` with dimensions: fit inside 2048x2048, scale the short
//!   side to 768, count 512px tiles (partial tiles round up), then
//!   `tiles * 170 + 85`
//! - `high` without dimensions: priced as a 1024x1024 image
//! - `medium` without dimensions: a flat 1024
//!
//! All arithmetic is integer and truncating, so the same input always
//! yields the same count.

use taskpilot_core::message::{ContentBlock, ImageDetail, Message, MessageContent, MessageToolCall};

/// Fixed cost of every message in a request.
pub const BASE_MESSAGE_TOKENS: u64 = 4;
/// Fixed cost of a whole request.
pub const FORMAT_TOKENS: u64 = 2;
pub const LOW_DETAIL_IMAGE_TOKENS: u64 = 85;
pub const HIGH_DETAIL_TILE_TOKENS: u64 = 170;
/// Default cost of a medium-detail image of unknown size.
pub const MEDIUM_DETAIL_DEFAULT_TOKENS: u64 = 1024;

pub const MAX_SIZE: u64 = 2048;
pub const HIGH_DETAIL_TARGET_SHORT_SIDE: u64 = 768;
pub const TILE_SIZE: u64 = 512;

/// Turns text into a token count.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

/// Heuristic tokenizer: 1 token per 4 bytes, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> u64 {
        (text.len() as u64).div_ceil(4)
    }
}

/// Estimates the input token cost of a request.
pub struct TokenCounter {
    tokenizer: Box<dyn Tokenizer>,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(Box::new(HeuristicTokenizer))
    }
}

impl TokenCounter {
    pub fn new(tokenizer: Box<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn count_text(&self, text: &str) -> u64 {
        if text.is_empty() {
            0
        } else {
            self.tokenizer.count(text)
        }
    }

    pub fn count_image(&self, detail: ImageDetail, dimensions: Option<(u32, u32)>) -> u64 {
        match (detail, dimensions) {
            (ImageDetail::Low, _) => LOW_DETAIL_IMAGE_TOKENS,
            (ImageDetail::High | ImageDetail::Medium, Some((w, h))) => {
                high_detail_tokens(u64::from(w), u64::from(h))
            }
            (ImageDetail::High, None) => high_detail_tokens(1024, 1024),
            (ImageDetail::Medium, None) => MEDIUM_DETAIL_DEFAULT_TOKENS,
        }
    }

    pub fn count_content(&self, content: &MessageContent) -> u64 {
        match content {
            MessageContent::Text(text) => self.count_text(text),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => self.count_text(text),
                    ContentBlock::Image {
                        detail, dimensions, ..
                    } => self.count_image(*detail, *dimensions),
                })
                .sum(),
        }
    }

    pub fn count_tool_calls(&self, calls: &[MessageToolCall]) -> u64 {
        calls
            .iter()
            .map(|c| self.count_text(&c.name) + self.count_text(&c.arguments))
            .sum()
    }

    /// Total input estimate for a request.
    pub fn count_messages(&self, messages: &[Message]) -> u64 {
        FORMAT_TOKENS
            + messages
                .iter()
                .map(|m| {
                    BASE_MESSAGE_TOKENS
                        + self.count_text(m.role.as_str())
                        + self.count_content(&m.content)
                        + self.count_tool_calls(&m.tool_calls)
                })
                .sum::<u64>()
    }
}

fn high_detail_tokens(mut width: u64, mut height: u64) -> u64 {
    if width == 0 || height == 0 {
        return LOW_DETAIL_IMAGE_TOKENS;
    }

    // Fit inside MAX_SIZE x MAX_SIZE
    if width > MAX_SIZE || height > MAX_SIZE {
        let longest = width.max(height);
        width = width * MAX_SIZE / longest;
        height = height * MAX_SIZE / longest;
    }

    // Shortest side to the target length
    let shortest = width.min(height).max(1);
    let scaled_width = width * HIGH_DETAIL_TARGET_SHORT_SIDE / shortest;
    let scaled_height = height * HIGH_DETAIL_TARGET_SHORT_SIDE / shortest;

    let tiles = scaled_width.div_ceil(TILE_SIZE) * scaled_height.div_ceil(TILE_SIZE);
    tiles * HIGH_DETAIL_TILE_TOKENS + LOW_DETAIL_IMAGE_TOKENS
}
