//! Storage seams consumed by the engine.
//!
//! The engine only talks to [`PhotoStore`] (reads) and [`ClusterStore`]
//! (cluster writes). [`sqlite::SqliteStore`] implements both.

mod schema;
pub mod sqlite;

use chrono::NaiveDateTime;

use crate::cluster::model::{Cluster, ClusterMembership, NewCluster};
use crate::error::Result;
use crate::photo::{GeoPoint, PhotoRecord};

pub use schema::SCHEMA;
pub use sqlite::SqliteStore;

/// Latitude/longitude rectangle in decimal degrees.
///
/// When `min_longitude > max_longitude` the box crosses the antimeridian and
/// covers `[min_longitude, 180] ∪ [-180, max_longitude]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Square of `half_size` degrees around `center`. Latitude is clipped to
    /// the poles; longitude wraps.
    pub fn around(center: &GeoPoint, half_size: f64) -> Self {
        let half_size = half_size.max(0.0);
        let (min_longitude, max_longitude) = if half_size >= 180.0 {
            (-180.0, 180.0)
        } else {
            let mut min = center.longitude - half_size;
            let mut max = center.longitude + half_size;
            if min < -180.0 {
                min += 360.0;
            }
            if max > 180.0 {
                max -= 360.0;
            }
            (min, max)
        };
        Self {
            min_latitude: (center.latitude - half_size).max(-90.0),
            max_latitude: (center.latitude + half_size).min(90.0),
            min_longitude,
            max_longitude,
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.min_longitude > self.max_longitude
    }
}

/// Predicates for listing photos. All set predicates must hold.
#[derive(Debug, Clone, Default)]
pub struct PhotoFilter {
    pub has_hash: bool,
    pub has_embedding: bool,
    pub taken_between: Option<(NaiveDateTime, NaiveDateTime)>,
    pub within: Option<BoundingBox>,
    pub ids: Option<Vec<i64>>,
    pub exclude_id: Option<i64>,
}

impl PhotoFilter {
    pub fn with_hash() -> Self {
        Self {
            has_hash: true,
            ..Default::default()
        }
    }

    pub fn with_embedding() -> Self {
        Self {
            has_embedding: true,
            ..Default::default()
        }
    }

    pub fn ids(ids: Vec<i64>) -> Self {
        Self {
            ids: Some(ids),
            ..Default::default()
        }
    }

    pub fn taken_between(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.taken_between = Some((start, end));
        self
    }

    pub fn within(mut self, bbox: BoundingBox) -> Self {
        self.within = Some(bbox);
        self
    }

    pub fn excluding(mut self, id: i64) -> Self {
        self.exclude_id = Some(id);
        self
    }
}

/// Read access to photo records.
pub trait PhotoStore: Send + Sync {
    fn get_photo(&self, id: i64) -> Result<Option<PhotoRecord>>;

    /// Photos matching `filter`, ordered by id.
    fn list_photos(&self, filter: &PhotoFilter) -> Result<Vec<PhotoRecord>>;
}

/// Persistence for clusters and memberships.
pub trait ClusterStore: Send + Sync {
    /// Delete every cluster and membership.
    fn clear_clusters(&self) -> Result<()>;

    /// Insert clusters with their memberships in one transaction, returning
    /// the new ids in input order.
    fn insert_clusters(&self, clusters: &[NewCluster]) -> Result<Vec<i64>>;

    /// Delete `cluster_id` and insert `replacements` in one transaction.
    fn replace_cluster(&self, cluster_id: i64, replacements: &[NewCluster]) -> Result<Vec<i64>>;

    /// Clusters with more than `max_members` members, ordered by id.
    fn oversized_clusters(&self, max_members: usize) -> Result<Vec<Cluster>>;

    /// Memberships of a cluster, ordered by photo id.
    fn cluster_members(&self, cluster_id: i64) -> Result<Vec<ClusterMembership>>;

    fn cluster_for_photo(&self, photo_id: i64) -> Result<Option<Cluster>>;

    /// All clusters, ordered by id.
    fn list_clusters(&self) -> Result<Vec<Cluster>>;
}

/// A store the full engine can run against.
pub trait Store: PhotoStore + ClusterStore {}

impl<T: PhotoStore + ClusterStore> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_clips_latitude() {
        let bbox = BoundingBox::around(&GeoPoint::new(89.8, 10.0), 0.5);
        assert_eq!(bbox.max_latitude, 90.0);
        assert!((bbox.min_latitude - 89.3).abs() < 1e-9);
        assert!(!bbox.crosses_antimeridian());
    }

    #[test]
    fn test_bounding_box_wraps_longitude() {
        let east = BoundingBox::around(&GeoPoint::new(0.0, 179.9), 0.5);
        assert!(east.crosses_antimeridian());
        assert!((east.min_longitude - 179.4).abs() < 1e-9);
        assert!((east.max_longitude + 179.6).abs() < 1e-9);

        let west = BoundingBox::around(&GeoPoint::new(0.0, -179.8), 0.5);
        assert!(west.crosses_antimeridian());
        assert!((west.min_longitude - 179.7).abs() < 1e-9);

        let whole = BoundingBox::around(&GeoPoint::new(0.0, 0.0), 200.0);
        assert_eq!((whole.min_longitude, whole.max_longitude), (-180.0, 180.0));
    }
}
