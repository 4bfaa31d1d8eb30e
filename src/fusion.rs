//! Weighted similarity fusion.
//!
//! `find_similar` runs in three steps:
//!
//! 1. a metadata pre-screen (time window and/or bounding box around the
//!    reference, or "any hashed photo" when the reference has neither),
//! 2. layer 1: cheap record signals with early stopping on hash, time and
//!    location, fused into a weighted score and cut to a short list,
//! 3. layer 2: pixel and description signals on the short list only, checked
//!    against a looser threshold.
//!
//! Signals that cannot be computed for a pair are left out of the weighted
//! average instead of counting as zero.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{EarlyStop, SimilarityConfig};
use crate::error::{Error, Result};
use crate::features::{self, Feature, FeatureScores, Layer, PixelSignature, PixelSource, WeightTable};
use crate::phash::{self, HashMatch};
use crate::photo::PhotoRecord;
use crate::store::{BoundingBox, PhotoFilter, PhotoStore};

/// Layer-1 features after the early-stopping stages, in evaluation order.
const LAYER1_REST: [Feature; 7] = [
    Feature::Camera,
    Feature::Scene,
    Feature::Objects,
    Feature::Emotion,
    Feature::Activity,
    Feature::AiTags,
    Feature::BasicTags,
];

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub photo_id: i64,
    /// Weighted average over every computed signal.
    pub aggregate_similarity: f32,
    pub layer1_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer2_score: Option<f32>,
    pub per_feature: FeatureScores,
}

pub struct SimilarityEngine {
    store: Arc<dyn PhotoStore>,
    pixels: Arc<dyn PixelSource>,
    config: SimilarityConfig,
    weights: WeightTable,
}

impl SimilarityEngine {
    pub fn new(
        store: Arc<dyn PhotoStore>,
        pixels: Arc<dyn PixelSource>,
        config: SimilarityConfig,
    ) -> Self {
        let weights = config.weights.table();
        Self {
            store,
            pixels,
            config,
            weights,
        }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    fn reference(&self, id: i64) -> Result<PhotoRecord> {
        self.store.get_photo(id)?.ok_or(Error::PhotoNotFound(id))
    }

    /// Photos whose perceptual hash is within `threshold` of the reference.
    pub fn find_near_duplicates(
        &self,
        reference_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<HashMatch>> {
        check_threshold("threshold", threshold)?;
        let reference = self.reference(reference_id)?;
        if !reference.has_hash() || limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .list_photos(&PhotoFilter::with_hash().excluding(reference_id))?;
        let matches = phash::find_matches(&reference, &candidates, threshold, limit);
        debug!(
            reference_id,
            candidates = candidates.len(),
            matches = matches.len(),
            "Near-duplicate search complete"
        );
        Ok(matches)
    }

    /// Ranked photos similar to the reference across all signals.
    ///
    /// Never returns an empty list while at least one candidate survives
    /// layer 1: the best survivor is returned alone when nothing clears the
    /// thresholds.
    pub fn find_similar(
        &self,
        reference_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        check_threshold("threshold", threshold)?;
        let reference = self.reference(reference_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.prescreen(&reference)?;
        let shortlist = self.score_layer1(&reference, &candidates, threshold, limit);
        let Some(best_layer1) = shortlist.first().cloned() else {
            debug!(reference_id, candidates = candidates.len(), "No layer-1 survivors");
            return Ok(Vec::new());
        };

        let records: HashMap<i64, &PhotoRecord> =
            candidates.iter().map(|c| (c.id, c)).collect();
        let mut results = self.score_layer2(&reference, shortlist, &records);
        if results.is_empty() {
            debug!(reference_id, "Layer 2 removed every survivor, keeping best layer-1 match");
            return Ok(vec![best_layer1]);
        }

        rank(&mut results, |r| r.aggregate_similarity);
        results.truncate(limit);
        debug!(
            reference_id,
            candidates = candidates.len(),
            results = results.len(),
            "Similarity search complete"
        );
        Ok(results)
    }

    /// Prescreen and layer 1 only: the short list, ranked by layer-1 score.
    pub fn layer1_only(
        &self,
        reference_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        check_threshold("threshold", threshold)?;
        let reference = self.reference(reference_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.prescreen(&reference)?;
        Ok(self.score_layer1(&reference, &candidates, threshold, limit))
    }

    /// Layer 2 over a short list from [`Self::layer1_only`].
    ///
    /// Returns the candidates that pass the layer-2 threshold, ranked by
    /// aggregate score. Unlike `find_similar`, the result may be empty.
    pub fn layer2_candidates(
        &self,
        reference_id: i64,
        shortlist: Vec<SimilarityResult>,
    ) -> Result<Vec<SimilarityResult>> {
        let reference = self.reference(reference_id)?;
        if shortlist.is_empty() {
            return Ok(Vec::new());
        }
        let ids = shortlist.iter().map(|r| r.photo_id).collect();
        let candidates = self.store.list_photos(&PhotoFilter::ids(ids))?;
        let records: HashMap<i64, &PhotoRecord> =
            candidates.iter().map(|c| (c.id, c)).collect();

        let mut results = self.score_layer2(&reference, shortlist, &records);
        rank(&mut results, |r| r.aggregate_similarity);
        Ok(results)
    }

    /// Every signal for one pair, without early stopping.
    pub fn score_pair(&self, id_a: i64, id_b: i64) -> Result<FeatureScores> {
        let a = self.reference(id_a)?;
        let b = self.reference(id_b)?;

        let mut scores = FeatureScores::new();
        for feature in Feature::ALL {
            scores.set(feature, features::record_feature(feature, &a, &b));
        }

        let sig_a = self.signature(&a)?;
        let sig_b = self.signature(&b)?;
        if let (Some(sa), Some(sb)) = (&sig_a, &sig_b) {
            scores.set(Feature::ColorHistogram, sa.color_similarity(sb));
            scores.set(Feature::Structural, sa.structural_similarity(sb));
        }
        Ok(scores)
    }

    /// Weighted average of `scores` over every computed signal.
    pub fn aggregate(&self, scores: &FeatureScores) -> Option<f32> {
        scores.weighted_average(&self.weights, None)
    }

    /// Candidates near the reference in time or space, reference excluded.
    pub fn prescreen(&self, reference: &PhotoRecord) -> Result<Vec<PhotoRecord>> {
        let mut filters = Vec::new();

        if let Some(taken_at) = reference.taken_at {
            let range = Duration::try_hours(self.config.time_window_hours.max(0)).and_then(|window| {
                Some((
                    taken_at.checked_sub_signed(window)?,
                    taken_at.checked_add_signed(window)?,
                ))
            });
            match range {
                Some((start, end)) => filters.push(
                    PhotoFilter::default()
                        .taken_between(start, end)
                        .excluding(reference.id),
                ),
                None => warn!(photo_id = reference.id, "Time window out of range, skipping"),
            }
        }
        if let Some(location) = &reference.location {
            let bbox = BoundingBox::around(location, self.config.bbox_degrees);
            filters.push(PhotoFilter::default().within(bbox).excluding(reference.id));
        }
        if filters.is_empty() {
            filters.push(PhotoFilter::with_hash().excluding(reference.id));
        }

        let mut merged: BTreeMap<i64, PhotoRecord> = BTreeMap::new();
        for filter in &filters {
            for photo in self.store.list_photos(filter)? {
                merged.entry(photo.id).or_insert(photo);
            }
        }
        Ok(merged.into_values().collect())
    }

    fn score_layer1(
        &self,
        reference: &PhotoRecord,
        candidates: &[PhotoRecord],
        threshold: f32,
        limit: usize,
    ) -> Vec<SimilarityResult> {
        let mut survivors: Vec<SimilarityResult> = candidates
            .par_iter()
            .filter(|c| c.id != reference.id)
            .filter_map(|candidate| self.layer1_candidate(reference, candidate))
            .collect();
        rank(&mut survivors, |r| r.layer1_score);

        let passed = survivors
            .iter()
            .take_while(|r| r.layer1_score >= threshold)
            .count();
        if passed == 0 {
            survivors.truncate(1);
        } else {
            survivors.truncate(passed.min(self.config.shortlist_size.max(limit)));
        }
        survivors
    }

    fn layer1_candidate(&self, reference: &PhotoRecord, candidate: &PhotoRecord) -> Option<SimilarityResult> {
        let mut scores = FeatureScores::new();

        let stages = [
            (Feature::PerceptualHash, &self.config.hash_stop),
            (Feature::Time, &self.config.time_stop),
            (Feature::Location, &self.config.location_stop),
        ];
        for (feature, stop) in stages {
            let score = features::record_feature(feature, reference, candidate);
            if !passes_stage(score, stop) {
                return None;
            }
            scores.set(feature, score);
        }
        for feature in LAYER1_REST {
            scores.set(feature, features::record_feature(feature, reference, candidate));
        }

        let layer1_score = scores.weighted_average(&self.weights, Some(Layer::Approximate))?;
        Some(SimilarityResult {
            photo_id: candidate.id,
            aggregate_similarity: layer1_score,
            layer1_score,
            layer2_score: None,
            per_feature: scores,
        })
    }

    fn score_layer2(
        &self,
        reference: &PhotoRecord,
        shortlist: Vec<SimilarityResult>,
        records: &HashMap<i64, &PhotoRecord>,
    ) -> Vec<SimilarityResult> {
        let reference_signature = match self.signature(reference) {
            Ok(signature) => signature,
            Err(e) => {
                warn!(photo_id = reference.id, error = %e, "Failed to load reference pixels");
                None
            }
        };

        shortlist
            .into_par_iter()
            .filter_map(|mut result| {
                let Some(candidate) = records.get(&result.photo_id) else {
                    warn!(photo_id = result.photo_id, "Short-listed photo disappeared, skipping");
                    return None;
                };

                let mut exact = FeatureScores::new();
                if let Some(reference_sig) = &reference_signature {
                    match self.signature(candidate) {
                        Ok(Some(sig)) => {
                            exact.set(Feature::ColorHistogram, reference_sig.color_similarity(&sig));
                            exact.set(Feature::Structural, reference_sig.structural_similarity(&sig));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(photo_id = candidate.id, error = %e, "Failed to load pixels, skipping");
                            return None;
                        }
                    }
                }
                exact.set(
                    Feature::Description,
                    features::record_feature(Feature::Description, reference, candidate),
                );

                let layer2_score = exact.weighted_average(&self.weights, Some(Layer::Exact));
                if layer2_score.is_some_and(|s| s < self.config.layer2_threshold) {
                    return None;
                }

                result.per_feature.merge(&exact);
                result.layer2_score = layer2_score;
                result.aggregate_similarity = self
                    .aggregate(&result.per_feature)
                    .unwrap_or(result.layer1_score);
                Some(result)
            })
            .collect()
    }

    fn signature(&self, photo: &PhotoRecord) -> Result<Option<PixelSignature>> {
        let Some(image) = self.pixels.load(photo)? else {
            return Ok(None);
        };
        Ok(Some(PixelSignature::compute(
            &image,
            self.config.histogram_bins(),
            self.config.ssim_resolution,
        )))
    }
}

/// Whether a stage score lets the candidate through.
fn passes_stage(score: Option<f32>, stop: &EarlyStop) -> bool {
    match score {
        Some(s) => s >= stop.minimum,
        None => !stop.required,
    }
}

/// Sort descending by `key`, ties by ascending photo id.
fn rank(results: &mut [SimilarityResult], key: impl Fn(&SimilarityResult) -> f32) {
    results.sort_by(|a, b| match key(b).total_cmp(&key(a)) {
        Ordering::Equal => a.photo_id.cmp(&b.photo_id),
        other => other,
    });
}

fn check_threshold(name: &'static str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidParameter {
            name,
            message: format!("expected a value in [0, 1], got {}", value),
        });
    }
    Ok(())
}
