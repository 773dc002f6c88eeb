use std::sync::LazyLock;

use regex::Regex;

/// Terms are runs of two or more Unicode word characters.
static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("token regex must compile"));

/// Lowercase `text` and split it into terms, ignoring punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_drops_punctuation() {
        assert_eq!(
            tokenize("BUY crypto, NOW!!! https://x.io"),
            vec!["buy", "crypto", "now", "https", "io"]
        );
    }

    #[test]
    fn skips_single_character_terms() {
        assert_eq!(tokenize("a b cd e"), vec!["cd"]);
    }

    #[test]
    fn handles_non_latin_scripts() {
        assert_eq!(tokenize("Купи КРИПТУ сейчас"), vec!["купи", "крипту", "сейчас"]);
    }
}
