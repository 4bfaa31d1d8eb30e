//! Photo records as consumed by the engine.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format used for capture timestamps at rest ("YYYY-MM-DDTHH:MM:SS").
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// GPS position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Camera parameters from EXIF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
}

/// Tags produced by the vision model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiTags {
    #[serde(default)]
    pub scene_type: Option<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Everything the engine knows about one photo. Read-only input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoRecord {
    pub id: i64,
    /// Location on disk, only used by the filesystem pixel source.
    pub path: Option<String>,
    /// Hex-encoded perceptual hash.
    pub perceptual_hash: Option<String>,
    /// L2-normalized embedding.
    pub embedding: Option<Vec<f32>>,
    pub taken_at: Option<NaiveDateTime>,
    pub location: Option<GeoPoint>,
    pub camera: Option<CameraInfo>,
    pub ai_tags: Option<AiTags>,
    /// Basic keyword tags.
    pub tags: Vec<String>,
}

impl PhotoRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.perceptual_hash = Some(hash.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_taken_at(mut self, taken_at: NaiveDateTime) -> Self {
        self.taken_at = Some(taken_at);
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint::new(latitude, longitude));
        self
    }

    pub fn with_camera(mut self, camera: CameraInfo) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_ai_tags(mut self, ai_tags: AiTags) -> Self {
        self.ai_tags = Some(ai_tags);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Description text from the AI tags, if any.
    pub fn description(&self) -> Option<&str> {
        self.ai_tags
            .as_ref()
            .and_then(|t| t.description.as_deref())
            .filter(|d| !d.trim().is_empty())
    }

    pub fn has_hash(&self) -> bool {
        self.perceptual_hash
            .as_deref()
            .is_some_and(|h| !h.is_empty())
    }
}

/// Parse a stored capture timestamp.
pub fn parse_timestamp(timestamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        let ts = parse_timestamp("2024-11-20T14:35:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-11-20T14:35:00");
        assert!(parse_timestamp("20 Nov 2024").is_none());
    }

    #[test]
    fn test_blank_description_is_none() {
        let photo = PhotoRecord::new(1).with_ai_tags(AiTags {
            description: Some("   ".to_string()),
            ..Default::default()
        });
        assert!(photo.description().is_none());
    }
}
