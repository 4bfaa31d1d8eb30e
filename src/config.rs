use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::features::pixels::HistogramBins;
use crate::features::{Feature, WeightTable};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub similarity: SimilarityConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,
}

/// Minimum score for one early-stopping stage of the layer-1 scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EarlyStop {
    /// Candidates scoring below this on the stage are discarded.
    #[serde(default)]
    pub minimum: f32,

    /// Discard candidates for which the signal cannot be computed at all.
    #[serde(default)]
    pub required: bool,
}

impl EarlyStop {
    pub fn new(minimum: f32) -> Self {
        Self {
            minimum,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Final aggregate threshold used when a caller does not pass one.
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f32,

    /// Looser threshold applied to the layer-2 score.
    #[serde(default = "default_layer2_threshold")]
    pub layer2_threshold: f32,

    /// Maximum layer-1 survivors handed to layer 2.
    #[serde(default = "default_shortlist_size")]
    pub shortlist_size: usize,

    /// Pre-screen window around the reference capture time, in hours.
    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: i64,

    /// Pre-screen bounding box half-size around the reference, in degrees.
    #[serde(default = "default_bbox_degrees")]
    pub bbox_degrees: f64,

    #[serde(default = "default_hash_stop")]
    pub hash_stop: EarlyStop,

    #[serde(default = "default_time_stop")]
    pub time_stop: EarlyStop,

    #[serde(default = "default_location_stop")]
    pub location_stop: EarlyStop,

    /// Side length of the grayscale images compared by SSIM.
    #[serde(default = "default_ssim_resolution")]
    pub ssim_resolution: u32,

    #[serde(default = "default_hue_bins")]
    pub hue_bins: usize,

    #[serde(default = "default_saturation_bins")]
    pub saturation_bins: usize,

    #[serde(default = "default_value_bins")]
    pub value_bins: usize,

    #[serde(default)]
    pub weights: FeatureWeights,
}

impl SimilarityConfig {
    pub fn histogram_bins(&self) -> HistogramBins {
        HistogramBins {
            hue: self.hue_bins,
            saturation: self.saturation_bins,
            value: self.value_bins,
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.6
}

fn default_layer2_threshold() -> f32 {
    0.3
}

fn default_shortlist_size() -> usize {
    50
}

fn default_time_window_hours() -> i64 {
    30 * 24
}

fn default_bbox_degrees() -> f64 {
    0.5
}

fn default_hash_stop() -> EarlyStop {
    EarlyStop::new(0.5)
}

fn default_time_stop() -> EarlyStop {
    EarlyStop::new(0.0)
}

fn default_location_stop() -> EarlyStop {
    EarlyStop::new(0.0)
}

fn default_ssim_resolution() -> u32 {
    128
}

fn default_hue_bins() -> usize {
    16
}

fn default_saturation_bins() -> usize {
    4
}

fn default_value_bins() -> usize {
    4
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_similarity_threshold(),
            layer2_threshold: default_layer2_threshold(),
            shortlist_size: default_shortlist_size(),
            time_window_hours: default_time_window_hours(),
            bbox_degrees: default_bbox_degrees(),
            hash_stop: default_hash_stop(),
            time_stop: default_time_stop(),
            location_stop: default_location_stop(),
            ssim_resolution: default_ssim_resolution(),
            hue_bins: default_hue_bins(),
            saturation_bins: default_saturation_bins(),
            value_bins: default_value_bins(),
            weights: FeatureWeights::default(),
        }
    }
}

/// Relative weight of each signal in the fused score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub perceptual_hash: f32,
    pub time: f32,
    pub location: f32,
    pub camera: f32,
    pub scene: f32,
    pub objects: f32,
    pub emotion: f32,
    pub activity: f32,
    pub ai_tags: f32,
    pub basic_tags: f32,
    pub color_histogram: f32,
    pub structural: f32,
    pub description: f32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            perceptual_hash: 0.25,
            time: 0.10,
            location: 0.10,
            camera: 0.05,
            scene: 0.10,
            objects: 0.10,
            emotion: 0.05,
            activity: 0.05,
            ai_tags: 0.10,
            basic_tags: 0.10,
            color_histogram: 0.35,
            structural: 0.35,
            description: 0.30,
        }
    }
}

impl FeatureWeights {
    pub fn table(&self) -> WeightTable {
        let mut table = WeightTable::uniform();
        for feature in Feature::ALL {
            let weight = match feature {
                Feature::PerceptualHash => self.perceptual_hash,
                Feature::Time => self.time,
                Feature::Location => self.location,
                Feature::Camera => self.camera,
                Feature::Scene => self.scene,
                Feature::Objects => self.objects,
                Feature::Emotion => self.emotion,
                Feature::Activity => self.activity,
                Feature::AiTags => self.ai_tags,
                Feature::BasicTags => self.basic_tags,
                Feature::ColorHistogram => self.color_histogram,
                Feature::Structural => self.structural,
                Feature::Description => self.description,
            };
            table.set(feature, weight);
        }
        table
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Minimum cosine similarity between neighbours (eps = 1 - threshold).
    #[serde(default = "default_cluster_threshold")]
    pub similarity_threshold: f32,

    /// Neighbourhood size (including the point itself) for a core point.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Clusters above this many members are split during refinement.
    #[serde(default = "default_max_cluster_size")]
    pub max_cluster_size: usize,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Geometric factor applied to eps on each refinement iteration.
    #[serde(default = "default_eps_decay")]
    pub eps_decay: f32,

    /// Tightening never asks for more similarity than this.
    #[serde(default = "default_max_similarity")]
    pub max_similarity: f32,

    /// Clusters above this size are summarized from a sample.
    #[serde(default = "default_sample_threshold")]
    pub sample_threshold: usize,

    /// Members taken from each end of a sampled cluster.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Budget for neighbourhood lists during one partition, in bytes.
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
}

impl ClusteringConfig {
    pub fn base_eps(&self) -> f32 {
        1.0 - self.similarity_threshold
    }

    pub fn min_eps(&self) -> f32 {
        1.0 - self.max_similarity
    }

    /// eps for a refinement iteration (0-based): geometric decay, floored.
    pub fn refinement_eps(&self, iteration: usize) -> f32 {
        let eps = self.base_eps() * self.eps_decay.powi(iteration as i32 + 1);
        eps.max(self.min_eps())
    }
}

fn default_cluster_threshold() -> f32 {
    0.85
}

fn default_min_samples() -> usize {
    2
}

fn default_max_cluster_size() -> usize {
    50
}

fn default_max_iterations() -> usize {
    15
}

fn default_eps_decay() -> f32 {
    5.0 / 6.0
}

fn default_max_similarity() -> f32 {
    0.99
}

fn default_sample_threshold() -> usize {
    500
}

fn default_sample_size() -> usize {
    100
}

fn default_memory_limit_bytes() -> usize {
    2 * 1024 * 1024 * 1024 // 2GB
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_cluster_threshold(),
            min_samples: default_min_samples(),
            max_cluster_size: default_max_cluster_size(),
            max_iterations: default_max_iterations(),
            eps_decay: default_eps_decay(),
            max_similarity: default_max_similarity(),
            sample_threshold: default_sample_threshold(),
            sample_size: default_sample_size(),
            memory_limit_bytes: default_memory_limit_bytes(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photosim")
        .join("photosim.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            similarity: SimilarityConfig::default(),
            clustering: ClusteringConfig::default(),
        }
    }
}

impl Config {
    /// Load from `PHOTOSIM_CONFIG` or the default location, writing a
    /// default config file on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photosim")
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PHOTOSIM_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}
