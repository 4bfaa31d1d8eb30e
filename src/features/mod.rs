//! Per-pair similarity signals.
//!
//! Every signal is a [`Feature`]; a comparison yields a [`FeatureScores`]
//! holding one optional score per feature. A `None` score means the signal
//! was not applicable to the pair and is left out of any weighted average.

pub mod metadata;
pub mod pixels;
pub mod tags;
pub mod text;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::phash;
use crate::photo::PhotoRecord;

pub use pixels::{FilePixelSource, PixelSource, PixelSignature};

/// Which stage of the search computes a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Cheap metadata and tag signals.
    Approximate,
    /// Pixel and text signals, only run on the short list.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    PerceptualHash,
    Time,
    Location,
    Camera,
    Scene,
    Objects,
    Emotion,
    Activity,
    AiTags,
    BasicTags,
    ColorHistogram,
    Structural,
    Description,
}

impl Feature {
    pub const COUNT: usize = 13;

    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::PerceptualHash,
        Feature::Time,
        Feature::Location,
        Feature::Camera,
        Feature::Scene,
        Feature::Objects,
        Feature::Emotion,
        Feature::Activity,
        Feature::AiTags,
        Feature::BasicTags,
        Feature::ColorHistogram,
        Feature::Structural,
        Feature::Description,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn layer(self) -> Layer {
        match self {
            Feature::ColorHistogram | Feature::Structural | Feature::Description => Layer::Exact,
            _ => Layer::Approximate,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::PerceptualHash => "perceptual_hash",
            Feature::Time => "time",
            Feature::Location => "location",
            Feature::Camera => "camera",
            Feature::Scene => "scene",
            Feature::Objects => "objects",
            Feature::Emotion => "emotion",
            Feature::Activity => "activity",
            Feature::AiTags => "ai_tags",
            Feature::BasicTags => "basic_tags",
            Feature::ColorHistogram => "color_histogram",
            Feature::Structural => "structural",
            Feature::Description => "description",
        }
    }
}

/// One weight per feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightTable([f32; Feature::COUNT]);

impl WeightTable {
    pub fn uniform() -> Self {
        Self([1.0; Feature::COUNT])
    }

    pub fn get(&self, feature: Feature) -> f32 {
        self.0[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, weight: f32) {
        self.0[feature.index()] = weight.max(0.0);
    }
}

/// Optional score per feature for one pair of photos.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureScores([Option<f32>; Feature::COUNT]);

impl FeatureScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feature: Feature) -> Option<f32> {
        self.0[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, score: Option<f32>) {
        self.0[feature.index()] = score.map(|s| s.clamp(0.0, 1.0));
    }

    /// Computed scores, in feature order.
    pub fn iter(&self) -> impl Iterator<Item = (Feature, f32)> + '_ {
        Feature::ALL
            .iter()
            .filter_map(|&f| self.get(f).map(|score| (f, score)))
    }

    pub fn computed_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_some()).count()
    }

    /// Weighted average over the computed scores in `layer` (or all layers),
    /// with weights re-normalized over the contributing features.
    pub fn weighted_average(&self, weights: &WeightTable, layer: Option<Layer>) -> Option<f32> {
        let mut total = 0.0f32;
        let mut weight_sum = 0.0f32;
        for (feature, score) in self.iter() {
            if layer.is_some_and(|l| feature.layer() != l) {
                continue;
            }
            let weight = weights.get(feature);
            if weight <= 0.0 {
                continue;
            }
            total += weight * score;
            weight_sum += weight;
        }
        if weight_sum > 0.0 {
            Some((total / weight_sum).clamp(0.0, 1.0))
        } else {
            None
        }
    }

    /// Overlay scores computed by another pass (missing entries are kept).
    pub fn merge(&mut self, other: &FeatureScores) {
        for (feature, score) in other.iter() {
            self.set(feature, Some(score));
        }
    }
}

impl Serialize for FeatureScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.computed_count()))?;
        for (feature, score) in self.iter() {
            map.serialize_entry(feature.name(), &score)?;
        }
        map.end()
    }
}

/// Compute a feature that needs nothing beyond the two records.
pub fn record_feature(feature: Feature, a: &PhotoRecord, b: &PhotoRecord) -> Option<f32> {
    match feature {
        Feature::PerceptualHash => {
            phash::similarity(a.perceptual_hash.as_deref()?, b.perceptual_hash.as_deref()?)
        }
        Feature::Time => metadata::time_similarity(a.taken_at.as_ref()?, b.taken_at.as_ref()?),
        Feature::Location => metadata::location_similarity(a.location.as_ref()?, b.location.as_ref()?),
        Feature::Camera => metadata::camera_similarity(a.camera.as_ref()?, b.camera.as_ref()?),
        Feature::Scene => {
            let (ta, tb) = (a.ai_tags.as_ref()?, b.ai_tags.as_ref()?);
            tags::scene_similarity(ta.scene_type.as_deref()?, tb.scene_type.as_deref()?)
        }
        Feature::Objects => {
            let (ta, tb) = (a.ai_tags.as_ref()?, b.ai_tags.as_ref()?);
            tags::list_jaccard(&ta.objects, &tb.objects)
        }
        Feature::Emotion => {
            let (ta, tb) = (a.ai_tags.as_ref()?, b.ai_tags.as_ref()?);
            tags::phrase_jaccard(ta.emotion.as_deref()?, tb.emotion.as_deref()?)
        }
        Feature::Activity => {
            let (ta, tb) = (a.ai_tags.as_ref()?, b.ai_tags.as_ref()?);
            tags::phrase_jaccard(ta.activity.as_deref()?, tb.activity.as_deref()?)
        }
        Feature::AiTags => {
            let (ta, tb) = (a.ai_tags.as_ref()?, b.ai_tags.as_ref()?);
            tags::list_jaccard(&ta.tags, &tb.tags)
        }
        Feature::BasicTags => tags::list_jaccard(&a.tags, &b.tags),
        Feature::Description => text::description_similarity(a.description()?, b.description()?),
        Feature::ColorHistogram | Feature::Structural => None,
    }
}
