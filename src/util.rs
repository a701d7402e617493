//! Small shared helpers.

/// Estimate the token count of a text without a tokenizer.
///
/// Roughly four characters per token for prose; code tokenizes denser, so
/// code-like text gets a 1.3x multiplier.
pub fn estimate_tokens(text: &str) -> u64 {
    let base = text.chars().count() as f64 / 4.0;
    let estimate = if looks_like_code(text) { base * 1.3 } else { base };
    estimate.ceil() as u64
}

/// Heuristic: fenced blocks, or a high density of structural punctuation.
fn looks_like_code(text: &str) -> bool {
    if text.contains("```") {
        return true;
    }
    let total = text.chars().count();
    if total < 20 {
        return false;
    }
    let structural = text
        .chars()
        .filter(|c| matches!(c, '{' | '}' | ';' | '(' | ')' | '='))
        .count();
    structural * 100 / total >= 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_estimate() {
        // 40 chars of prose -> 10 tokens.
        let text = "a".repeat(40);
        assert_eq!(estimate_tokens(&text), 10);
    }

    #[test]
    fn fenced_block_counts_as_code() {
        let text = format!("```rust\n{}\n```", "x".repeat(37));
        let prose = "y".repeat(text.chars().count());
        assert!(estimate_tokens(&text) > estimate_tokens(&prose));
    }

    #[test]
    fn dense_punctuation_counts_as_code() {
        assert!(looks_like_code("fn main() { let x = foo(); bar(x); }"));
        assert!(!looks_like_code(
            "The quick brown fox jumps over the lazy dog."
        ));
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }
}
