//! Set-overlap signals over AI-derived and basic tags.

use std::collections::BTreeSet;

/// Bonus added when one scene description is a strict subset of the other.
const SUBSET_BONUS: f32 = 0.2;

fn normalize(token: &str) -> Option<String> {
    let token = token.trim().to_lowercase();
    (!token.is_empty()).then_some(token)
}

/// Split free text ("beach, sunset / golden hour") into a token set.
fn phrase_tokens(phrase: &str) -> BTreeSet<String> {
    phrase
        .split(|c: char| c == ',' || c == ';' || c == '/' || c.is_whitespace())
        .filter_map(normalize)
        .collect()
}

fn list_tokens(items: &[String]) -> BTreeSet<String> {
    items.iter().filter_map(|s| normalize(s)).collect()
}

/// Intersection over union; `None` when either set is empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f32> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    Some(intersection as f32 / union as f32)
}

/// Jaccard over two tag lists, ignoring case and blank entries.
pub fn list_jaccard(a: &[String], b: &[String]) -> Option<f32> {
    jaccard(&list_tokens(a), &list_tokens(b))
}

/// Jaccard over the word sets of two short phrases.
pub fn phrase_jaccard(a: &str, b: &str) -> Option<f32> {
    jaccard(&phrase_tokens(a), &phrase_tokens(b))
}

/// Scene-type Jaccard with a bonus when one scene is contained in the other.
pub fn scene_similarity(a: &str, b: &str) -> Option<f32> {
    let (sa, sb) = (phrase_tokens(a), phrase_tokens(b));
    let score = jaccard(&sa, &sb)?;
    let strict_subset = sa != sb && (sa.is_subset(&sb) || sb.is_subset(&sa));
    if strict_subset {
        Some((score + SUBSET_BONUS).min(1.0))
    } else {
        Some(score)
    }
}
