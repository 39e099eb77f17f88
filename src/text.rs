//! Token helpers shared by table classification, intent scoring and the glossary.

/// Lowercase, split on anything that is not alphanumeric, singularise.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(singularize)
        .collect()
}

/// Naive plural stripping, enough for report headers ("Calls", "Distributions").
fn singularize(token: &str) -> String {
    let keeps_s = token.len() <= 3
        || token.ends_with("ss")
        || token.ends_with("us")
        || token.ends_with("is")
        || token.chars().all(|c| c.is_ascii_digit());

    if !keeps_s && token.ends_with('s') {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Whole-token phrase match: `"capital call"` matches `["capital", "call"]`
/// but `"recall"` does not match `["recallable"]`.
pub fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle = tokenize(phrase);
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Position of the first token after `phrase`, if the phrase occurs.
pub fn phrase_end(tokens: &[String], phrase: &str) -> Option<usize> {
    let needle = tokenize(phrase);
    if needle.is_empty() || needle.len() > tokens.len() {
        return None;
    }
    tokens
        .windows(needle.len())
        .position(|w| w == needle.as_slice())
        .map(|start| start + needle.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_singularizes() {
        assert_eq!(tokenize("Capital Calls"), vec!["capital", "call"]);
        assert_eq!(tokenize("Distributions (USD)"), vec!["distribution", "usd"]);
        assert_eq!(tokenize("What is DPI?"), vec!["what", "is", "dpi"]);
        assert_eq!(tokenize("2024"), vec!["2024"]);
    }

    #[test]
    fn test_phrase_matching_is_whole_token() {
        let tokens = tokenize("Recallable distributions");
        assert!(contains_phrase(&tokens, "recallable"));
        assert!(!contains_phrase(&tokens, "recall"));
        assert!(contains_phrase(&tokenize("all capital calls"), "capital call"));
    }

    #[test]
    fn test_phrase_end() {
        let tokens = tokenize("dpi as of 2023-12-31");
        assert_eq!(phrase_end(&tokens, "as of"), Some(3));
        assert_eq!(phrase_end(&tokens, "since"), None);
    }
}
