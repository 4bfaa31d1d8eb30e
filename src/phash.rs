//! Perceptual hash comparison for near-identical copy detection.
//!
//! Hashes are hex strings. Two hashes are only comparable when they have the
//! same number of hex digits; anything else (different lengths, non-hex
//! characters, empty strings) is simply not a match candidate.

use serde::Serialize;

use crate::photo::PhotoRecord;

/// A parsed perceptual hash, packed 16 hex digits per word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerceptualHash {
    words: Vec<u64>,
    hex_len: usize,
}

impl PerceptualHash {
    /// Parse a hex string. Returns `None` for empty or non-hex input.
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let words = hex
            .as_bytes()
            .chunks(16)
            .map(|chunk| {
                // chunk is ASCII hex, checked above
                let s = std::str::from_utf8(chunk).ok()?;
                u64::from_str_radix(s, 16).ok()
            })
            .collect::<Option<Vec<u64>>>()?;
        Some(Self {
            words,
            hex_len: hex.len(),
        })
    }

    /// Largest possible Hamming distance for a hash of this length.
    pub fn max_distance(&self) -> u32 {
        (self.hex_len * 4) as u32
    }

    /// Hamming distance, or `None` if the hashes are not comparable.
    pub fn distance(&self, other: &PerceptualHash) -> Option<u32> {
        if self.hex_len != other.hex_len {
            return None;
        }
        Some(
            self.words
                .iter()
                .zip(other.words.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }

    /// Normalized similarity in [0, 1].
    pub fn similarity(&self, other: &PerceptualHash) -> Option<f32> {
        let distance = self.distance(other)?;
        Some(1.0 - distance as f32 / self.max_distance() as f32)
    }
}

/// Similarity between two hex hashes; `None` when they are not comparable.
pub fn similarity(hash_a: &str, hash_b: &str) -> Option<f32> {
    let a = PerceptualHash::parse(hash_a)?;
    let b = PerceptualHash::parse(hash_b)?;
    a.similarity(&b)
}

/// Largest Hamming distance that still meets `threshold`.
pub fn max_distance_for(threshold: f32, max_distance: u32) -> u32 {
    let threshold = threshold.clamp(0.0, 1.0);
    ((1.0 - threshold) * max_distance as f32 + 1e-4).floor() as u32
}

/// A ranked near-duplicate match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashMatch {
    pub photo_id: i64,
    pub similarity: f32,
    pub distance: u32,
}

/// Rank `candidates` by perceptual-hash similarity to `reference`.
///
/// Candidates without a comparable hash are skipped, as is the reference
/// itself. Results are sorted by descending similarity, ties by ascending id.
pub fn find_matches(
    reference: &PhotoRecord,
    candidates: &[PhotoRecord],
    threshold: f32,
    limit: usize,
) -> Vec<HashMatch> {
    let Some(reference_hash) = reference
        .perceptual_hash
        .as_deref()
        .and_then(PerceptualHash::parse)
    else {
        return Vec::new();
    };

    let max_distance = reference_hash.max_distance();
    let cutoff = max_distance_for(threshold, max_distance);

    let mut matches: Vec<HashMatch> = candidates
        .iter()
        .filter(|c| c.id != reference.id)
        .filter_map(|candidate| {
            let hash = PerceptualHash::parse(candidate.perceptual_hash.as_deref()?)?;
            let distance = reference_hash.distance(&hash)?;
            if distance > cutoff {
                return None;
            }
            Some(HashMatch {
                photo_id: candidate.id,
                similarity: 1.0 - distance as f32 / max_distance as f32,
                distance,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| a.photo_id.cmp(&b.photo_id))
    });
    matches.truncate(limit);
    matches
}
