//! Embedding matrix and per-cluster statistics.

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use tracing::{debug, warn};

use super::model::{NewCluster, QualityTier};
use crate::config::ClusteringConfig;
use crate::error::{Error, Result};
use crate::photo::PhotoRecord;

/// Valid embeddings of a set of photos, one L2-normalized row per photo,
/// rows ordered by photo id.
#[derive(Debug, Clone)]
pub struct EmbeddingSet {
    ids: Vec<i64>,
    rows: Array2<f32>,
    index: HashMap<i64, usize>,
}

impl EmbeddingSet {
    /// Build from photos, skipping missing or unusable embeddings.
    ///
    /// An embedding is usable when it is non-empty, finite, has a non-zero
    /// norm and the same dimension as the first usable one.
    pub fn from_photos(photos: &[PhotoRecord]) -> Result<Self> {
        let mut sorted: Vec<&PhotoRecord> = photos.iter().collect();
        sorted.sort_by_key(|p| p.id);

        let mut dimension = None;
        let mut accepted: Vec<(i64, &[f32], f32)> = Vec::new();
        for photo in sorted {
            let Some(embedding) = photo.embedding.as_deref() else {
                continue;
            };
            if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
                warn!(photo_id = photo.id, "Skipping unusable embedding");
                continue;
            }
            let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm == 0.0 || !norm.is_finite() {
                warn!(photo_id = photo.id, "Skipping zero-norm embedding");
                continue;
            }
            match dimension {
                None => dimension = Some(embedding.len()),
                Some(d) if d != embedding.len() => {
                    warn!(
                        photo_id = photo.id,
                        expected = d,
                        found = embedding.len(),
                        "Skipping embedding with mismatched dimension"
                    );
                    continue;
                }
                Some(_) => {}
            }
            if accepted.last().is_some_and(|(id, _, _)| *id == photo.id) {
                continue;
            }
            accepted.push((photo.id, embedding, norm));
        }

        let dimension = dimension.unwrap_or(0);
        let len = accepted.len().saturating_mul(dimension);
        let mut data: Vec<f32> = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::ResourceExhausted {
                operation: "embedding matrix",
                requested_bytes: len.saturating_mul(std::mem::size_of::<f32>()),
            })?;
        for (_, embedding, norm) in &accepted {
            data.extend(embedding.iter().map(|v| v / norm));
        }

        let rows = Array2::from_shape_vec((accepted.len(), dimension), data)
            .map_err(|e| Error::Clustering(e.to_string()))?;
        let ids: Vec<i64> = accepted.iter().map(|(id, _, _)| *id).collect();
        let index = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        Ok(Self { ids, rows, index })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.rows.ncols()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.rows
    }

    pub fn row_of(&self, photo_id: i64) -> Option<usize> {
        self.index.get(&photo_id).copied()
    }

    /// Rows for the given photo ids, in ascending id order. Unknown ids are
    /// dropped.
    pub fn rows_of(&self, photo_ids: impl IntoIterator<Item = i64>) -> Vec<usize> {
        let mut rows: Vec<usize> = photo_ids
            .into_iter()
            .filter_map(|id| self.row_of(id))
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    /// Matrix restricted to `rows`, in the given order.
    pub fn select(&self, rows: &[usize]) -> Array2<f32> {
        self.rows.select(Axis(0), rows)
    }

    fn row(&self, row: usize) -> ArrayView1<'_, f32> {
        self.rows.row(row)
    }
}

/// The first and last `min(sample_size, n / 2)` rows once a cluster is
/// larger than `sample_threshold`; all rows otherwise.
pub fn sample_rows(rows: &[usize], sample_threshold: usize, sample_size: usize) -> Vec<usize> {
    let n = rows.len();
    if n <= sample_threshold {
        return rows.to_vec();
    }
    let k = sample_size.min(n / 2);
    rows[..k].iter().chain(&rows[n - k..]).copied().collect()
}

/// Mean of the given rows.
pub fn centroid(set: &EmbeddingSet, rows: &[usize]) -> Array1<f32> {
    let mut sum = Array1::<f32>::zeros(set.dimension());
    for &row in rows {
        sum += &set.row(row);
    }
    if !rows.is_empty() {
        sum /= rows.len() as f32;
    }
    sum
}

/// Mean pairwise cosine similarity over the given rows.
pub fn average_pairwise_similarity(set: &EmbeddingSet, rows: &[usize]) -> f32 {
    if rows.len() < 2 {
        return 1.0;
    }
    let sample = set.select(rows);
    let gram = sample.dot(&sample.t());
    let n = rows.len();

    let mut total = 0.0f64;
    for i in 0..n {
        for j in (i + 1)..n {
            total += gram[[i, j]] as f64;
        }
    }
    let pairs = (n * (n - 1) / 2) as f64;
    (total / pairs) as f32
}

/// Build a persistable cluster from embedding rows (ascending id order).
///
/// Returns `None` when fewer than two rows remain.
pub fn build_cluster(
    set: &EmbeddingSet,
    rows: &[usize],
    config: &ClusteringConfig,
    similarity_threshold: f32,
) -> Option<NewCluster> {
    if rows.len() < 2 {
        debug!(members = rows.len(), "Skipping cluster candidate with too few embeddings");
        return None;
    }

    let sample = sample_rows(rows, config.sample_threshold, config.sample_size);
    let avg_intra = average_pairwise_similarity(set, &sample).clamp(0.0, 1.0);

    let center = centroid(set, &sample);
    let center_norm = center.dot(&center).sqrt();

    let mut members = Vec::with_capacity(rows.len());
    let mut representative = None;
    let mut best = f32::NEG_INFINITY;
    let mut similarity_sum = 0.0f64;
    for &row in rows {
        let raw = if center_norm > 0.0 {
            set.row(row).dot(&center) / center_norm
        } else {
            0.0
        };
        let similarity = raw.clamp(0.0, 1.0);
        let photo_id = set.ids[row];
        // Rows are in id order, so strict comparison keeps the lowest id on ties.
        if raw > best {
            best = raw;
            representative = Some(photo_id);
        }
        similarity_sum += similarity as f64;
        members.push((photo_id, similarity));
    }
    members.sort_by_key(|(id, _)| *id);

    let mean_to_centroid = (similarity_sum / rows.len() as f64) as f32;
    let confidence = ((avg_intra + mean_to_centroid) / 2.0).clamp(0.0, 1.0);

    Some(NewCluster {
        representative_photo_id: representative?,
        avg_intra_similarity: avg_intra,
        confidence_score: confidence,
        quality_tier: QualityTier::classify(members.len(), avg_intra),
        similarity_threshold,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(id: i64, embedding: Vec<f32>) -> PhotoRecord {
        PhotoRecord::new(id).with_embedding(embedding)
    }

    #[test]
    fn test_embedding_validation() {
        let photos = vec![
            photo(5, vec![0.0, 2.0, 0.0]),
            photo(1, vec![3.0, 4.0, 0.0]),
            photo(2, vec![]),
            photo(3, vec![f32::NAN, 1.0, 0.0]),
            photo(4, vec![0.0, 0.0, 0.0]),
            photo(6, vec![1.0, 0.0]),
            PhotoRecord::new(7),
        ];
        let set = EmbeddingSet::from_photos(&photos).unwrap();
        assert_eq!(set.ids(), &[1, 5]);
        assert_eq!(set.dimension(), 3);
        assert!((set.matrix()[[0, 0]] - 0.6).abs() < 1e-6);
        assert!((set.matrix()[[1, 1]] - 1.0).abs() < 1e-6);
        assert_eq!(set.row_of(5), Some(1));
        assert_eq!(set.rows_of([5, 9, 1]), vec![0, 1]);
    }

    #[test]
    fn test_empty_set() {
        let set = EmbeddingSet::from_photos(&[PhotoRecord::new(1)]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_sample_rows_first_and_last() {
        let rows: Vec<usize> = (0..600).collect();
        let sample = sample_rows(&rows, 500, 100);
        assert_eq!(sample.len(), 200);
        assert_eq!(sample[0], 0);
        assert_eq!(sample[99], 99);
        assert_eq!(sample[100], 500);
        assert_eq!(sample[199], 599);

        let small: Vec<usize> = (0..50).collect();
        assert_eq!(sample_rows(&small, 500, 100), small);
        assert_eq!(sample_rows(&small, 10, 100).len(), 50);
    }

    #[test]
    fn test_build_cluster_statistics() {
        let photos = vec![
            photo(10, vec![1.0, 0.0]),
            photo(11, vec![1.0, 0.1]),
            photo(12, vec![1.0, -0.1]),
        ];
        let set = EmbeddingSet::from_photos(&photos).unwrap();
        let config = ClusteringConfig::default();
        let cluster = build_cluster(&set, &[0, 1, 2], &config, 0.85).unwrap();

        assert_eq!(cluster.member_count(), 3);
        assert_eq!(cluster.representative_photo_id, 10);
        assert_eq!(cluster.quality_tier, QualityTier::Medium);
        assert!(cluster.avg_intra_similarity > 0.98);
        assert!(cluster.confidence_score > 0.98 && cluster.confidence_score <= 1.0);
        assert!(cluster.members.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
        assert_eq!(cluster.similarity_threshold, 0.85);
    }

    #[test]
    fn test_representative_tie_takes_lowest_id() {
        let photos = vec![photo(8, vec![1.0, 0.0]), photo(3, vec![0.0, 1.0])];
        let set = EmbeddingSet::from_photos(&photos).unwrap();
        let cluster = build_cluster(&set, &[0, 1], &ClusteringConfig::default(), 0.5).unwrap();
        assert_eq!(cluster.representative_photo_id, 3);
    }

    #[test]
    fn test_single_member_is_not_a_cluster() {
        let set = EmbeddingSet::from_photos(&[photo(1, vec![1.0, 0.0])]).unwrap();
        assert!(build_cluster(&set, &[0], &ClusteringConfig::default(), 0.85).is_none());
    }

    #[test]
    fn test_opposite_vectors_clamp_to_zero() {
        let photos = vec![photo(1, vec![1.0, 0.0]), photo(2, vec![-1.0, 0.0])];
        let set = EmbeddingSet::from_photos(&photos).unwrap();
        let cluster = build_cluster(&set, &[0, 1], &ClusteringConfig::default(), 0.5).unwrap();
        assert_eq!(cluster.avg_intra_similarity, 0.0);
        assert!(cluster.members.iter().all(|(_, s)| *s == 0.0));
        assert_eq!(cluster.representative_photo_id, 1);
        assert_eq!(cluster.quality_tier, QualityTier::Low);
    }
}
