//! Cost estimation for context budgeting.
//!
//! The default model uses a character-based heuristic: ~4 characters per
//! cost unit. This approximation is accurate within ~10% for BPE tokenizers
//! (Gemini, GPT, Claude) on English text. Exact tokenization is deliberately
//! out of scope — the ratio lives behind the `CostModel` trait so a real
//! tokenizer can be dropped in later without touching call sites.

/// A deterministic, pure cost function over summary text.
///
/// Contract: the result is weakly monotonic in text length, `0` for empty
/// text, and at least `1` for any non-empty text (so short documents still
/// register against the running total).
pub trait CostModel: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// The default chars/4 heuristic, rounding up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCost;

impl CostModel for CharCost {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(CharCost.estimate(""), 0);
    }

    #[test]
    fn single_char_is_one() {
        assert_eq!(CharCost.estimate("a"), 1);
    }

    #[test]
    fn four_chars_is_one_unit() {
        assert_eq!(CharCost.estimate("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(CharCost.estimate("hello"), 2);
    }

    #[test]
    fn two_hundred_chars() {
        let text = "a".repeat(200);
        assert_eq!(CharCost.estimate(&text), 50);
    }

    #[test]
    fn non_decreasing_in_length() {
        let mut prev = 0;
        for n in 0..256 {
            let cost = CharCost.estimate(&"x".repeat(n));
            assert!(cost >= prev, "cost dropped at length {n}");
            prev = cost;
        }
    }
}
