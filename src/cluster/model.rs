//! Persisted cluster records.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    /// `high`: at least 5 members and 0.8 average similarity; `medium`: at
    /// least 3 members and 0.7; everything else is `low`.
    pub fn classify(member_count: usize, avg_similarity: f32) -> Self {
        if member_count >= 5 && avg_similarity >= 0.8 {
            QualityTier::High
        } else if member_count >= 3 && avg_similarity >= 0.7 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "high" => QualityTier::High,
            "medium" => QualityTier::Medium,
            _ => QualityTier::Low,
        }
    }
}

/// A stored cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: i64,
    pub representative_photo_id: Option<i64>,
    pub member_count: usize,
    pub avg_intra_similarity: f32,
    pub confidence_score: f32,
    pub quality_tier: QualityTier,
    pub similarity_threshold: f32,
}

/// One photo's membership in a stored cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterMembership {
    pub cluster_id: i64,
    pub photo_id: i64,
    pub similarity_to_cluster: f32,
}

/// A cluster ready to be written. Ids are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCluster {
    pub representative_photo_id: i64,
    pub avg_intra_similarity: f32,
    pub confidence_score: f32,
    pub quality_tier: QualityTier,
    pub similarity_threshold: f32,
    /// `(photo_id, similarity_to_cluster)`, ordered by photo id.
    pub members: Vec<(i64, f32)>,
}

impl NewCluster {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
