//! Token estimation

use citechat_core::ChatMessage;

/// Approximate token counter used for memory budgeting.
///
/// Counts are estimates; the model actually in use may tokenize differently.
pub trait TokenEstimator: Send + Sync {
    fn estimate_text(&self, text: &str) -> u32;

    fn estimate_message(&self, message: &ChatMessage) -> u32 {
        ROLE_OVERHEAD_TOKENS + self.estimate_text(&message.content)
    }
}

const ROLE_OVERHEAD_TOKENS: u32 = 4;

/// Character-class heuristic: ~4 ASCII chars per token, CJK heavier.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenEstimator;

impl TokenEstimator for HeuristicTokenEstimator {
    fn estimate_text(&self, text: &str) -> u32 {
        estimate_tokens(text)
    }
}

/// Language-aware token estimation for multi-language support
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    let ascii_chars = text.chars().filter(|c| c.is_ascii()).count();
    let cjk_chars = text.chars().filter(|c| is_cjk(*c)).count();
    let other_chars = text.chars().count() - ascii_chars - cjk_chars;

    let estimated =
        (ascii_chars as f64 / 4.0) + (cjk_chars as f64 * 1.5) + (other_chars as f64 * 1.0);

    estimated.ceil().max(1.0) as u32
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Extension A
        '\u{AC00}'..='\u{D7AF}' |   // Korean Hangul
        '\u{3040}'..='\u{30FF}' |   // Japanese Hiragana/Katakana
        '\u{31F0}'..='\u{31FF}'     // Katakana Extensions
    )
}

pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    HeuristicTokenEstimator.estimate_message(message)
}
