//! Embedding-based photo clustering.
//!
//! A pass clears the previous partition, runs DBSCAN over every valid
//! embedding, persists the result and then repeatedly re-clusters groups
//! above the size ceiling with a tighter eps until they fit, nothing splits
//! any more, or the iteration budget runs out.

pub mod dbscan;
pub mod model;
pub mod refine;
pub mod stats;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClusteringConfig;
use crate::error::{Error, Result};
use crate::store::{ClusterStore, PhotoFilter, PhotoStore, Store};
use crate::tasks::{PassControl, TaskUpdate};

pub use dbscan::{dbscan, DbscanParams};
pub use model::{Cluster, ClusterMembership, NewCluster, QualityTier};
pub use refine::{RefinementState, Split, WorkItem};
pub use stats::{build_cluster, EmbeddingSet};

/// Result of a clustering pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassSummary {
    /// Clusters persisted when the pass finished.
    pub clusters_created: usize,
    /// Successful splits of oversized clusters.
    pub refinements_applied: usize,
    pub photos_considered: usize,
    pub photos_clustered: usize,
    pub iterations: usize,
    /// No persisted cluster exceeds the size ceiling.
    pub converged: bool,
}

pub struct ClusterEngine {
    store: Arc<dyn Store>,
    config: ClusteringConfig,
}

impl ClusterEngine {
    pub fn new(store: Arc<dyn Store>, config: ClusteringConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn get_cluster_for_photo(&self, photo_id: i64) -> Result<Option<Cluster>> {
        self.store.cluster_for_photo(photo_id)
    }

    /// Run one full clustering pass.
    ///
    /// On cancellation, clusters already written stay in place (pending
    /// oversized groups are flushed first) and `Error::Cancelled` is
    /// returned.
    pub fn run_clustering_pass(&self, control: &PassControl) -> Result<PassSummary> {
        control.send(TaskUpdate::Started {
            total: self.config.max_iterations + 1,
        });
        match self.pass(control) {
            Ok(summary) => {
                control.send(TaskUpdate::Completed {
                    message: format!(
                        "Created {} clusters ({} refinements)",
                        summary.clusters_created, summary.refinements_applied
                    ),
                });
                Ok(summary)
            }
            Err(Error::Cancelled) => {
                control.send(TaskUpdate::Cancelled);
                Err(Error::Cancelled)
            }
            Err(e) => {
                control.send(TaskUpdate::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn pass(&self, control: &PassControl) -> Result<PassSummary> {
        let total_steps = self.config.max_iterations + 1;

        self.store.clear_clusters()?;

        let photos = self.store.list_photos(&PhotoFilter::with_embedding())?;
        let set = EmbeddingSet::from_photos(&photos)?;
        drop(photos);
        info!(photos = set.len(), dimension = set.dimension(), "Starting clustering pass");

        let mut summary = PassSummary {
            photos_considered: set.len(),
            ..Default::default()
        };
        if set.len() < 2 {
            info!("Not enough embeddings to cluster");
            summary.converged = true;
            return Ok(summary);
        }

        let labels = dbscan(set.matrix().view(), &self.params(self.config.base_eps()))?;
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (row, label) in labels.into_iter().enumerate() {
            if let Some(label) = label {
                if groups.len() <= label {
                    groups.resize_with(label + 1, Vec::new);
                }
                groups[label].push(row);
            }
        }
        let initial: Vec<NewCluster> = groups
            .iter()
            .filter_map(|rows| {
                build_cluster(&set, rows, &self.config, self.config.similarity_threshold)
            })
            .collect();
        self.store.insert_clusters(&initial)?;
        info!(clusters = initial.len(), "Initial partition stored");
        control.progress(1, total_steps, "Initial partition stored");

        let mut state = RefinementState::new();
        let refined = self.refine(&set, &mut state, control);

        // Pending groups are persisted even when refinement stops early.
        self.flush_pending(&set, &mut state)?;
        summary.converged = refined?
            && self
                .store
                .oversized_clusters(self.config.max_cluster_size)?
                .is_empty();

        let clusters = self.store.list_clusters()?;
        summary.clusters_created = clusters.len();
        summary.photos_clustered = clusters.iter().map(|c| c.member_count).sum();
        summary.refinements_applied = state.refinements_applied;
        summary.iterations = state.iterations;

        info!(
            clusters = summary.clusters_created,
            refinements = summary.refinements_applied,
            clustered = summary.photos_clustered,
            iterations = summary.iterations,
            "Clustering pass complete"
        );
        Ok(summary)
    }

    /// Split oversized clusters. Returns whether every oversized cluster was
    /// resolved; `Ok(false)` when refinement stalled or ran out of budget.
    fn refine(
        &self,
        set: &EmbeddingSet,
        state: &mut RefinementState,
        control: &PassControl,
    ) -> Result<bool> {
        let ceiling = self.config.max_cluster_size;
        let total_steps = self.config.max_iterations + 1;

        for iteration in 0..self.config.max_iterations {
            if control.is_cancelled() {
                info!(iteration, "Clustering pass cancelled");
                return Err(Error::Cancelled);
            }

            let mut stored = Vec::new();
            for cluster in self.store.oversized_clusters(ceiling)? {
                let members = self.store.cluster_members(cluster.id)?;
                let rows = set.rows_of(members.iter().map(|m| m.photo_id));
                stored.push((cluster.id, rows));
            }
            let work = state.take_work(stored);
            if work.is_empty() {
                debug!(iteration, "No oversized clusters left");
                return Ok(true);
            }

            state.iterations += 1;
            let eps = self.config.refinement_eps(iteration);
            let params = self.params(eps);
            debug!(iteration, eps, oversized = work.len(), "Refining oversized clusters");

            let mut successes = 0;
            for item in work {
                let split = refine::split(set, item.rows(), &params)?;
                if !split.is_successful() {
                    debug!(members = item.rows().len(), eps, "Cluster did not split");
                    if let WorkItem::Carried { rows } = item {
                        state.carry(rows);
                    }
                    continue;
                }
                successes += 1;
                state.refinements_applied += 1;

                let mut fitting = Vec::new();
                for group in split.groups {
                    if group.len() > ceiling {
                        state.carry(group);
                    } else if let Some(cluster) = build_cluster(set, &group, &self.config, 1.0 - eps) {
                        fitting.push(cluster);
                    }
                }

                match item {
                    WorkItem::Stored { cluster_id, .. } => {
                        let ids = self.store.replace_cluster(cluster_id, &fitting)?;
                        debug!(cluster_id, replacements = ids.len(), noise = split.noise, "Split stored cluster");
                    }
                    WorkItem::Carried { .. } => {
                        let ids = self.store.insert_clusters(&fitting)?;
                        debug!(inserted = ids.len(), noise = split.noise, "Split carried cluster");
                    }
                }
            }

            control.progress(iteration + 2, total_steps, format!("Refinement iteration {}", iteration + 1));
            if successes == 0 {
                warn!(iteration, eps, "Refinement stalled: no oversized cluster could be split");
                return Ok(false);
            }
        }

        let remaining = self.store.oversized_clusters(ceiling)?.len() + state.pending.len();
        if remaining > 0 {
            warn!(
                iterations = self.config.max_iterations,
                remaining, "Refinement budget exhausted with oversized clusters left"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Persist carried groups as they are.
    fn flush_pending(&self, set: &EmbeddingSet, state: &mut RefinementState) -> Result<()> {
        let pending = state.take_pending();
        if pending.is_empty() {
            return Ok(());
        }
        let eps = self.config.refinement_eps(state.iterations.saturating_sub(1));
        let clusters: Vec<NewCluster> = pending
            .iter()
            .filter_map(|rows| build_cluster(set, rows, &self.config, 1.0 - eps))
            .collect();
        let ids = self.store.insert_clusters(&clusters)?;
        warn!(clusters = ids.len(), "Persisted oversized clusters that could not be split");
        Ok(())
    }

    fn params(&self, eps: f32) -> DbscanParams {
        DbscanParams {
            eps,
            min_samples: self.config.min_samples,
            memory_limit_bytes: self.config.memory_limit_bytes,
        }
    }
}
