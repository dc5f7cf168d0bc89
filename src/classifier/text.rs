//! Text preprocessing shared by training, inference and explanation.

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me",
    "more", "most", "my", "myself", "no", "nor", "not", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should", "so",
    "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "you", "your", "yours", "yourself", "yourselves",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Lowercase and replace every non-alphanumeric ASCII character with a space,
/// collapsing runs of whitespace.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tokens in message order, stop words and single letters removed.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .filter(|t| t.len() > 1 || t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !is_stop_word(t))
        .map(str::to_string)
        .collect()
}

/// Unigrams followed by adjacent bigrams.
pub fn ngrams(tokens: &[String]) -> Vec<String> {
    let mut terms: Vec<String> = tokens.to_vec();
    terms.extend(tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])));
    terms
}

/// Distinct tokens in first-seen order.
pub fn distinct_tokens(tokens: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokens
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_sorted() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize("WIN a FREE prize!!! Call 0800-123"), "win a free prize call 0800 123");
        assert_eq!(normalize("  "), "");
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        let tokens = tokenize("You have WON the prize, claim it now");
        assert_eq!(tokens, vec!["won", "prize", "claim", "now"]);
    }

    #[test]
    fn test_tokenize_keeps_digit_tokens() {
        let tokens = tokenize("text 8 to 80082");
        assert_eq!(tokens, vec!["text", "8", "80082"]);
    }

    #[test]
    fn test_ngrams() {
        let tokens = vec!["free".to_string(), "prize".to_string(), "now".to_string()];
        let terms = ngrams(&tokens);
        assert_eq!(terms, vec!["free", "prize", "now", "free prize", "prize now"]);
    }

    #[test]
    fn test_distinct_tokens_preserve_order() {
        let tokens: Vec<String> = ["b", "a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(distinct_tokens(&tokens), vec!["b", "a", "c"]);
    }
}
