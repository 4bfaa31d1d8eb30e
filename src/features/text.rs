//! Description similarity: TF-IDF cosine over the two descriptions.

use std::collections::{BTreeMap, BTreeSet};

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as",
    "at", "be", "been", "before", "being", "below", "between", "both", "but", "by", "can", "could",
    "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had",
    "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my", "no", "nor", "not",
    "of", "off", "on", "once", "only", "or", "other", "our", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Lower-cased alphanumeric tokens with stop words and one-letter tokens removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() > 1 && !is_stop_word(t))
        .collect()
}

fn term_counts(tokens: &[String]) -> BTreeMap<&str, f64> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity of the TF-IDF vectors of two descriptions, with the
/// idf fitted on the pair itself (smoothed: `ln((1 + n) / (1 + df)) + 1`).
pub fn description_similarity(a: &str, b: &str) -> Option<f32> {
    let (ta, tb) = (tokenize(a), tokenize(b));
    if ta.is_empty() || tb.is_empty() {
        return None;
    }
    let (ca, cb) = (term_counts(&ta), term_counts(&tb));

    let vocabulary: BTreeSet<&str> = ca.keys().chain(cb.keys()).copied().collect();
    let docs = 2.0f64;

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for term in vocabulary {
        let fa = ca.get(term).copied().unwrap_or(0.0);
        let fb = cb.get(term).copied().unwrap_or(0.0);
        let df = (fa > 0.0) as u8 as f64 + (fb > 0.0) as u8 as f64;
        let idf = ((1.0 + docs) / (1.0 + df)).ln() + 1.0;
        let (wa, wb) = (fa * idf, fb * idf);
        dot += wa * wb;
        norm_a += wa * wa;
        norm_b += wb * wb;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0) as f32)
}
