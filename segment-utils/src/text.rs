use std::collections::HashSet;

use regex::Regex;
use std::sync::OnceLock;

fn punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("valid regex"))
}

fn filler_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(uh|um|ah|er|eh|hmm|hm)\b").expect("valid regex")
    })
}

/// Lowercases, strips punctuation, collapses whitespace.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = punctuation_re().replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Punctuation-free word list, in order.
pub fn tokenize_words(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// `[0,1]` similarity over normalized token sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = tokenize_words(a).into_iter().collect();
    let tokens_b: HashSet<String> = tokenize_words(b).into_iter().collect();
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Character-level Levenshtein distance.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// `1 - distance/max_len`, normalized so identical strings score 1.0 and
/// completely disjoint strings of equal length score 0.0.
pub fn normalized_levenshtein_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_text(a);
    let nb = normalize_text(b);
    let max_len = na.chars().count().max(nb.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(&na, &nb) as f64 / max_len as f64)
}

/// Strips the fixed filler-word set, whole-word, case-insensitive, then
/// collapses the whitespace left behind. Idempotent (R3): running this on
/// its own output is a no-op.
pub fn remove_filler_words(text: &str) -> String {
    let stripped = filler_word_re().replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_punctuation_and_case() {
        assert_eq!(normalize_text("Hello,  WORLD!!"), "hello world");
    }

    #[test]
    fn jaccard_similarity_identical_is_one() {
        assert_eq!(jaccard_similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn jaccard_similarity_disjoint_is_zero() {
        assert_eq!(jaccard_similarity("hello world", "foo bar"), 0.0);
    }

    #[test]
    fn remove_filler_words_is_idempotent() {
        let once = remove_filler_words("um so uh I think, hmm, that works");
        let twice = remove_filler_words(&once);
        assert_eq!(once, twice);
        assert!(!once.to_lowercase().contains("um"));
    }

    #[test]
    fn remove_filler_words_keeps_whole_words_only() {
        // "hum" contains "hm" as a substring but is not the filler word itself.
        assert_eq!(remove_filler_words("hummus is great"), "hummus is great");
    }

    #[test]
    fn normalized_levenshtein_identical_strings_score_one() {
        assert_eq!(normalized_levenshtein_similarity("same text", "same text"), 1.0);
    }
}
