//! Text normalization for entity mentions
//!
//! Relation extractors tend to bleed function words and punctuation into
//! entity spans ("APT28 has", "the Lazarus Group,"). Everything that compares
//! entity text goes through [`normalize`] / [`comparison_key`] first.

use std::collections::BTreeSet;

/// Function words stripped from either end of a mention
pub const STOP_FRAGMENTS: &[&str] = &[
    "has", "is", "are", "was", "were", "have", "had", "to", "the", "a", "an", "and", "or", "of",
    "in", "on", "at", "for", "with", "by",
];

const LEADING_PUNCTUATION: &[char] = &['"', '\'', '(', '[', '{', '“', '‘', ',', ';', ':'];

const TRAILING_PUNCTUATION: &[char] = &[
    ',', ';', ':', '.', '!', '?', '"', '\'', ')', ']', '}', '”', '’',
];

/// Normalize a raw mention for display, preserving case
///
/// Idempotent and infallible: input that would normalize to nothing comes
/// back whitespace-collapsed instead.
pub fn normalize(raw: &str) -> String {
    let fallback = collapse_whitespace(raw);
    let mut current = fallback.clone();

    loop {
        let next = normalize_step(&current);
        if next == current {
            break;
        }
        current = next;
    }

    if current.is_empty() {
        fallback
    } else {
        current
    }
}

/// Case-insensitive identity key of a mention
pub fn comparison_key(raw: &str) -> String {
    normalize(raw).to_lowercase()
}

/// Lowercased tokens that carry meaning (no stop fragments, at least two chars)
pub fn significant_tokens(raw: &str) -> BTreeSet<String> {
    comparison_key(raw)
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| t.chars().count() >= 2 && !is_stop_fragment(t))
        .map(str::to_string)
        .collect()
}

/// Whether a mention is worth resolving at all
pub fn is_meaningful(raw: &str) -> bool {
    let normalized = normalize(raw);
    normalized.chars().count() >= 2
        && normalized.chars().any(char::is_alphanumeric)
        && !is_stop_fragment(&normalized.to_lowercase())
}

/// Check a single lowercased word against the stop list
pub fn is_stop_fragment(word: &str) -> bool {
    STOP_FRAGMENTS.contains(&word)
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_step(text: &str) -> String {
    let trimmed = text
        .trim_start_matches(|c: char| c.is_whitespace() || LEADING_PUNCTUATION.contains(&c))
        .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_PUNCTUATION.contains(&c));

    let mut tokens: Vec<&str> = trimmed.split_whitespace().collect();
    while tokens.len() > 1 && is_stop_token(tokens[0]) {
        tokens.remove(0);
    }
    while tokens.len() > 1 && tokens.last().is_some_and(|t| is_stop_token(t)) {
        tokens.pop();
    }

    tokens.join(" ")
}

fn is_stop_token(token: &str) -> bool {
    let word = token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    is_stop_fragment(&word)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_trailing_function_words() {
        assert_eq!(normalize("APT28 has"), "APT28");
        assert_eq!(normalize("  the Lazarus   Group,  "), "Lazarus Group");
        assert_eq!(normalize("utility sector within the"), "utility sector within");
        assert_eq!(normalize("Turla is to"), "Turla");
    }

    #[test]
    fn test_strips_edge_punctuation_only() {
        assert_eq!(normalize("\"XAgent\"."), "XAgent");
        assert_eq!(normalize("(Sofacy)"), "Sofacy");
        assert_eq!(normalize("C:\\Windows\\Temp\\svc.exe"), "C:\\Windows\\Temp\\svc.exe");
        assert_eq!(normalize("hxxp://evil.example/"), "hxxp://evil.example/");
        assert_eq!(normalize(".NET"), ".NET");
    }

    #[test]
    fn test_single_stop_word_passes_through() {
        assert_eq!(normalize("the"), "the");
        assert_eq!(normalize(" of "), "of");
    }

    #[test]
    fn test_empty_result_degrades_to_passthrough() {
        assert_eq!(normalize("..."), "...");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_comparison_key_folds_case() {
        assert_eq!(comparison_key("APT28 has"), "apt28");
        assert_eq!(comparison_key("Operation  Black Mine"), "operation black mine");
    }

    #[test]
    fn test_significant_tokens() {
        let tokens = significant_tokens("Operation of the Black Mine,");
        assert_eq!(
            tokens.into_iter().collect::<Vec<_>>(),
            vec!["black", "mine", "operation"]
        );
        assert!(significant_tokens("a").is_empty());
    }

    #[test]
    fn test_is_meaningful() {
        assert!(is_meaningful("APT28"));
        assert!(is_meaningful("the XAgent"));
        assert!(!is_meaningful("of"));
        assert!(!is_meaningful("x"));
        assert!(!is_meaningful("--"));
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in "\\PC{0,48}") {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn prop_comparison_key_is_idempotent(raw in "[ -~]{0,48}") {
            let once = comparison_key(&raw);
            prop_assert_eq!(comparison_key(&once), once);
        }

        #[test]
        fn prop_non_blank_input_never_normalizes_to_empty(raw in "[ -~]{0,48}") {
            prop_assume!(!raw.trim().is_empty());
            prop_assert!(!normalize(&raw).is_empty());
        }
    }
}
