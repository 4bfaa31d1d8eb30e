//! Worklist state for splitting oversized clusters.

use std::collections::BTreeMap;

use ndarray::ArrayView2;

use super::dbscan::{dbscan, DbscanParams};
use super::stats::EmbeddingSet;
use crate::error::Result;

/// A cluster queued for another split attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Persisted under `cluster_id`; replaced in storage when split.
    Stored { cluster_id: i64, rows: Vec<usize> },
    /// Held in memory only, produced by an earlier split.
    Carried { rows: Vec<usize> },
}

impl WorkItem {
    pub fn rows(&self) -> &[usize] {
        match self {
            WorkItem::Stored { rows, .. } | WorkItem::Carried { rows } => rows,
        }
    }
}

/// Outcome of re-clustering one oversized cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Sub-clusters in label order, each in ascending row order.
    pub groups: Vec<Vec<usize>>,
    pub noise: usize,
}

impl Split {
    /// Whether the split changed anything: several groups, or members
    /// demoted to noise.
    pub fn is_successful(&self) -> bool {
        self.groups.len() >= 2 || self.noise > 0
    }
}

/// Re-run DBSCAN on a subset of rows.
pub fn split(set: &EmbeddingSet, rows: &[usize], params: &DbscanParams) -> Result<Split> {
    let matrix = set.select(rows);
    split_matrix(matrix.view(), rows, params)
}

fn split_matrix(matrix: ArrayView2<'_, f32>, rows: &[usize], params: &DbscanParams) -> Result<Split> {
    let labels = dbscan(matrix, params)?;

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut noise = 0;
    for (row, label) in rows.iter().zip(labels) {
        match label {
            Some(label) => groups.entry(label).or_default().push(*row),
            None => noise += 1,
        }
    }
    Ok(Split {
        groups: groups.into_values().collect(),
        noise,
    })
}

/// State threaded through the refinement loop.
#[derive(Debug, Default)]
pub struct RefinementState {
    /// Oversized sub-clusters waiting for the next iteration.
    pub pending: Vec<Vec<usize>>,
    /// Successful splits so far.
    pub refinements_applied: usize,
    /// Iterations started.
    pub iterations: usize,
}

impl RefinementState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build this iteration's worklist: stored clusters first (by id), then
    /// carried ones in the order they were produced.
    pub fn take_work(&mut self, stored: Vec<(i64, Vec<usize>)>) -> Vec<WorkItem> {
        let mut work: Vec<WorkItem> = stored
            .into_iter()
            .map(|(cluster_id, rows)| WorkItem::Stored { cluster_id, rows })
            .collect();
        work.extend(self.pending.drain(..).map(|rows| WorkItem::Carried { rows }));
        work
    }

    pub fn carry(&mut self, rows: Vec<usize>) {
        self.pending.push(rows);
    }

    pub fn take_pending(&mut self) -> Vec<Vec<usize>> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photo::PhotoRecord;

    fn set_from(angles: &[f32]) -> EmbeddingSet {
        let photos: Vec<PhotoRecord> = angles
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let rad = a.to_radians();
                PhotoRecord::new(i as i64 + 1).with_embedding(vec![rad.cos(), rad.sin()])
            })
            .collect();
        EmbeddingSet::from_photos(&photos).unwrap()
    }

    fn params(eps: f32) -> DbscanParams {
        DbscanParams {
            eps,
            min_samples: 2,
            memory_limit_bytes: 1 << 30,
        }
    }

    #[test]
    fn test_split_success_rules() {
        assert!(Split { groups: vec![vec![0], vec![1]], noise: 0 }.is_successful());
        assert!(Split { groups: vec![vec![0, 1]], noise: 1 }.is_successful());
        assert!(!Split { groups: vec![vec![0, 1, 2]], noise: 0 }.is_successful());
    }

    #[test]
    fn test_split_subset_maps_back_to_rows() {
        let set = set_from(&[0.0, 1.0, 60.0, 61.0, 120.0]);
        let result = split(&set, &[0, 1, 2, 3, 4], &params(0.01)).unwrap();
        assert_eq!(result.groups, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(result.noise, 1);

        let result = split(&set, &[2, 3], &params(0.01)).unwrap();
        assert_eq!(result.groups, vec![vec![2, 3]]);
        assert!(!result.is_successful());
    }

    #[test]
    fn test_take_work_orders_stored_first() {
        let mut state = RefinementState::new();
        state.carry(vec![7, 8]);
        let work = state.take_work(vec![(3, vec![0, 1])]);
        assert_eq!(
            work,
            vec![
                WorkItem::Stored { cluster_id: 3, rows: vec![0, 1] },
                WorkItem::Carried { rows: vec![7, 8] },
            ]
        );
        assert!(state.pending.is_empty());
        assert_eq!(work[1].rows(), &[7, 8]);
    }
}
