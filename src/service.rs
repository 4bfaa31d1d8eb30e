//! Async entry point.
//!
//! Every call runs on tokio's blocking pool so store access and vector math
//! never stall the runtime's worker threads.

use std::sync::Arc;

use tracing::info;

use crate::cluster::{Cluster, ClusterEngine, PassSummary};
use crate::config::Config;
use crate::error::Result;
use crate::features::{FeatureScores, FilePixelSource, PixelSource};
use crate::fusion::{SimilarityEngine, SimilarityResult};
use crate::phash::HashMatch;
use crate::store::{SqliteStore, Store};
use crate::tasks::PassControl;

#[derive(Clone)]
pub struct PhotoSimilarity {
    similarity: Arc<SimilarityEngine>,
    clusters: Arc<ClusterEngine>,
}

impl PhotoSimilarity {
    pub fn new<S: Store + 'static>(store: Arc<S>, pixels: Arc<dyn PixelSource>, config: &Config) -> Self {
        let similarity = SimilarityEngine::new(store.clone(), pixels, config.similarity.clone());
        let clusters = ClusterEngine::new(store, config.clustering.clone());
        Self {
            similarity: Arc::new(similarity),
            clusters: Arc::new(clusters),
        }
    }

    /// Open the configured SQLite database and read pixels from disk.
    pub fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)?;
        info!(path = %config.db_path.display(), "Database opened");
        Ok(Self::new(
            Arc::new(store),
            Arc::new(FilePixelSource::default()),
            config,
        ))
    }

    pub fn similarity_engine(&self) -> &SimilarityEngine {
        &self.similarity
    }

    pub fn cluster_engine(&self) -> &ClusterEngine {
        &self.clusters
    }

    pub async fn find_near_duplicates(
        &self,
        reference_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<HashMatch>> {
        blocking(&self.similarity, move |engine| {
            engine.find_near_duplicates(reference_id, threshold, limit)
        })
        .await
    }

    pub async fn find_similar(
        &self,
        reference_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        blocking(&self.similarity, move |engine| {
            engine.find_similar(reference_id, threshold, limit)
        })
        .await
    }

    pub async fn layer1_only(
        &self,
        reference_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        blocking(&self.similarity, move |engine| {
            engine.layer1_only(reference_id, threshold, limit)
        })
        .await
    }

    pub async fn layer2_candidates(
        &self,
        reference_id: i64,
        shortlist: Vec<SimilarityResult>,
    ) -> Result<Vec<SimilarityResult>> {
        blocking(&self.similarity, move |engine| {
            engine.layer2_candidates(reference_id, shortlist)
        })
        .await
    }

    pub async fn score_pair(&self, id_a: i64, id_b: i64) -> Result<FeatureScores> {
        blocking(&self.similarity, move |engine| engine.score_pair(id_a, id_b)).await
    }

    /// Run a clustering pass. Callers run at most one pass per library at a
    /// time.
    pub async fn run_clustering_pass(&self, control: PassControl) -> Result<PassSummary> {
        blocking(&self.clusters, move |engine| engine.run_clustering_pass(&control)).await
    }

    pub async fn get_cluster_for_photo(&self, photo_id: i64) -> Result<Option<Cluster>> {
        blocking(&self.clusters, move |engine| engine.get_cluster_for_photo(photo_id)).await
    }
}

async fn blocking<E, T, F>(engine: &Arc<E>, job: F) -> Result<T>
where
    E: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&E) -> Result<T> + Send + 'static,
{
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || job(&engine)).await?
}
