//! Tokenizer trait and the default character-based estimator.
//!
//! The allocator is deliberately tolerant of small estimation error, so the
//! default implementation is a ~4 characters/token heuristic. Hosts that need
//! tighter budgets plug in a real tokenizer behind the same trait.

/// Deterministic token counting. Pure function, no I/O.
pub trait Tokenizer: Send + Sync {
    /// Estimate the token count of `text`.
    fn count(&self, text: &str) -> usize;
}

/// Character-based heuristic: 1 token ≈ 4 characters, rounded up.
/// Accurate within ~10% for BPE tokenizers on English text.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(4)
    }
}

/// Truncate `text` to at most `max_tokens`, cutting on a char boundary.
///
/// Works with any tokenizer: cuts at an optimistic byte position first, then
/// shrinks until the estimate fits. Prefix counts are monotonic, so this
/// terminates with a valid prefix.
pub fn truncate_to_tokens(text: &str, max_tokens: usize, tokenizer: &dyn Tokenizer) -> String {
    if tokenizer.count(text) <= max_tokens {
        return text.to_string();
    }
    if max_tokens == 0 {
        return String::new();
    }

    // Optimistic first cut: assume ~4 bytes/token.
    let mut end = floor_char_boundary(text, (max_tokens * 4).min(text.len()));
    while end > 0 && tokenizer.count(&text[..end]) > max_tokens {
        // Shrink by 10% per step until the estimate fits.
        let next = end - (end / 10).max(1);
        end = floor_char_boundary(text, next);
    }
    text[..end].to_string()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(CharTokenizer.count(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(CharTokenizer.count("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(CharTokenizer.count("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(CharTokenizer.count(&text), 25);
    }

    #[test]
    fn truncation_is_noop_when_within_budget() {
        let text = "short text";
        assert_eq!(truncate_to_tokens(text, 100, &CharTokenizer), text);
    }

    #[test]
    fn truncation_respects_token_ceiling() {
        let text = "a".repeat(1000);
        let truncated = truncate_to_tokens(&text, 50, &CharTokenizer);
        assert!(CharTokenizer.count(&truncated) <= 50);
        assert!(!truncated.is_empty());
    }

    #[test]
    fn truncation_lands_on_char_boundary() {
        let text = "日本語のテキスト".repeat(100);
        let truncated = truncate_to_tokens(&text, 20, &CharTokenizer);
        assert!(text.starts_with(&truncated));
        assert!(CharTokenizer.count(&truncated) <= 20);
    }

    #[test]
    fn zero_budget_truncates_to_empty() {
        assert_eq!(truncate_to_tokens("anything", 0, &CharTokenizer), "");
    }
}
