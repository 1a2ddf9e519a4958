use std::collections::HashSet;
use std::sync::LazyLock;

use stop_words::{get, LANGUAGE};

/// English stopwords removed before n-gram formation.
pub static ENGLISH: LazyLock<HashSet<String>> = LazyLock::new(|| {
    get(LANGUAGE::English)
        .iter()
        .map(|w| w.to_lowercase())
        .collect()
});

/// Tokens that survive normalization but carry no topical signal.
const KEYWORD_EXTRAS: &[&str] = &["user", "users", "https", "http", "co", "amp", "rt", "via"];

/// Stopwords for cluster keyword extraction: English plus normalization residue.
pub static KEYWORD: LazyLock<HashSet<String>> = LazyLock::new(|| {
    let mut words = ENGLISH.clone();
    words.extend(KEYWORD_EXTRAS.iter().map(|w| w.to_string()));
    words
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_contains_common_function_words() {
        for w in ["the", "and", "of", "is"] {
            assert!(ENGLISH.contains(w), "missing {w}");
        }
    }

    #[test]
    fn keyword_set_adds_residue_tokens() {
        for w in KEYWORD_EXTRAS {
            assert!(KEYWORD.contains(*w));
        }
        assert!(KEYWORD.contains("the"));
        assert!(!KEYWORD.contains("bitcoin"));
    }
}
