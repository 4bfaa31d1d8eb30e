//! DBSCAN over L2-normalized embeddings with cosine distance.
//!
//! Neighbourhoods come from row-block Gram products (`block · Xᵀ`) computed in
//! parallel. Everything that grows with the input is checked against a byte
//! budget before it is allocated, so a library that does not fit fails with
//! [`Error::ResourceExhausted`] instead of aborting the process.

use std::collections::VecDeque;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{s, ArrayView2};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};

const BLOCK_ROWS: usize = 256;
const OPERATION: &str = "neighbourhood computation";

#[derive(Debug, Clone, Copy)]
pub struct DbscanParams {
    /// Maximum cosine distance (`1 - similarity`) between neighbours.
    pub eps: f32,
    /// Neighbours a core point needs, counting itself.
    pub min_samples: usize,
    pub memory_limit_bytes: usize,
}

impl DbscanParams {
    fn validate(&self) -> Result<()> {
        if !(self.eps > 0.0 && self.eps <= 2.0) {
            return Err(Error::InvalidParameter {
                name: "eps",
                message: format!("must be in (0, 2], got {}", self.eps),
            });
        }
        if self.min_samples == 0 {
            return Err(Error::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Cluster the rows of `matrix`. Returns one label per row, `None` for noise.
///
/// Labels are assigned in row order, so identical input yields identical
/// labels.
pub fn dbscan(matrix: ArrayView2<'_, f32>, params: &DbscanParams) -> Result<Vec<Option<usize>>> {
    params.validate()?;
    let n = matrix.nrows();
    if n == 0 {
        return Ok(Vec::new());
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::Clustering("embedding matrix contains non-finite values".to_string()));
    }

    let neighbours = neighbourhoods(matrix, 1.0 - params.eps, params.memory_limit_bytes)?;
    let core: Vec<bool> = neighbours
        .iter()
        .map(|list| list.len() >= params.min_samples)
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut next_label = 0;
    let mut queue = VecDeque::new();

    for start in 0..n {
        if labels[start].is_some() || !core[start] {
            continue;
        }
        labels[start] = Some(next_label);
        queue.push_back(start);

        while let Some(point) = queue.pop_front() {
            if !core[point] {
                continue;
            }
            for &neighbour in &neighbours[point] {
                let neighbour = neighbour as usize;
                if labels[neighbour].is_none() {
                    labels[neighbour] = Some(next_label);
                    queue.push_back(neighbour);
                }
            }
        }
        next_label += 1;
    }

    debug!(
        points = n,
        clusters = next_label,
        noise = labels.iter().filter(|l| l.is_none()).count(),
        eps = params.eps,
        "DBSCAN complete"
    );
    Ok(labels)
}

/// Indices of every row within `min_similarity` of each row (self included).
fn neighbourhoods(
    matrix: ArrayView2<'_, f32>,
    min_similarity: f32,
    memory_limit: usize,
) -> Result<Vec<Vec<u32>>> {
    let n = matrix.nrows();
    if n > u32::MAX as usize {
        return Err(exhausted(n.saturating_mul(size_of::<u32>())));
    }
    let block = BLOCK_ROWS.min(n);

    // Gram blocks in flight plus the outer neighbour list.
    let scratch = block
        .saturating_mul(n)
        .saturating_mul(size_of::<f32>())
        .saturating_mul(rayon::current_num_threads());
    let base = n.saturating_mul(size_of::<Vec<u32>>());
    let upfront = scratch.saturating_add(base);
    if upfront > memory_limit {
        return Err(exhausted(upfront));
    }

    let used = AtomicUsize::new(base);
    let starts: Vec<usize> = (0..n).step_by(block).collect();

    let blocks = starts
        .into_par_iter()
        .map(|start| {
            let end = (start + block).min(n);
            let gram = matrix.slice(s![start..end, ..]).dot(&matrix.t());

            let mut rows: Vec<Vec<u32>> = Vec::new();
            rows.try_reserve_exact(end - start)
                .map_err(|_| exhausted((end - start) * size_of::<Vec<u32>>()))?;

            for (offset, similarities) in gram.rows().into_iter().enumerate() {
                let row = start + offset;
                let is_neighbour = |(j, sim): &(usize, &f32)| *j == row || **sim >= min_similarity;

                let count = similarities.iter().enumerate().filter(is_neighbour).count();
                let bytes = count * size_of::<u32>();
                let total = used.fetch_add(bytes, Ordering::Relaxed) + bytes;
                if total > memory_limit {
                    return Err(exhausted(total));
                }

                let mut list: Vec<u32> = Vec::new();
                list.try_reserve_exact(count).map_err(|_| exhausted(bytes))?;
                list.extend(
                    similarities
                        .iter()
                        .enumerate()
                        .filter(is_neighbour)
                        .map(|(j, _)| j as u32),
                );
                rows.push(list);
            }
            Ok(rows)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(blocks.into_iter().flatten().collect())
}

fn exhausted(requested_bytes: usize) -> Error {
    Error::ResourceExhausted {
        operation: OPERATION,
        requested_bytes,
    }
}
