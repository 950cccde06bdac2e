//! Deterministic prompt trimming.
//!
//! Provider tokenizers differ; interpolated prompt material is bounded with
//! a byte heuristic instead of a tokenizer so trimming is cheap, stable
//! across providers, and has no model dependency.

/// Conservative bytes-per-token estimate for mixed English/markdown text.
const APPROX_BYTES_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(APPROX_BYTES_PER_TOKEN)
}

/// Truncate `text` to at most `max_tokens` estimated tokens.
///
/// The cut is backed off to a char boundary so the result is always valid
/// UTF-8 (a mid-codepoint cut would panic on slicing).
pub fn trim_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_bytes = max_tokens.saturating_mul(APPROX_BYTES_PER_TOKEN);
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(trim_to_tokens("hello", 10), "hello");
    }

    #[test]
    fn long_text_is_cut_to_the_byte_budget() {
        let text = "a".repeat(100);
        assert_eq!(trim_to_tokens(&text, 10).len(), 40);
    }

    #[test]
    fn cut_backs_off_to_a_char_boundary() {
        // Each 'é' is 2 bytes; a 7-byte budget would land mid-codepoint.
        let text = "ééééééé";
        let out = trim_to_tokens(text, 1); // 4-byte budget
        assert_eq!(out, "éé");
        assert!(out.len() <= 4);
    }

    #[test]
    fn zero_budget_yields_empty() {
        assert_eq!(trim_to_tokens("hello world", 0), "");
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
