//! Photo similarity search and clustering.
//!
//! - [`phash`]: perceptual-hash near-duplicate matching.
//! - [`fusion`]: weighted multi-signal "find similar" search.
//! - [`cluster`]: DBSCAN clustering over embeddings with size-bounded
//!   refinement.
//! - [`service`]: async facade running all of the above off the runtime
//!   threads.

pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod fusion;
pub mod logging;
pub mod phash;
pub mod photo;
pub mod service;
pub mod store;
pub mod tasks;

pub use cluster::{Cluster, ClusterEngine, ClusterMembership, PassSummary, QualityTier};
pub use config::Config;
pub use error::{Error, Result};
pub use features::{Feature, FeatureScores, WeightTable};
pub use fusion::{SimilarityEngine, SimilarityResult};
pub use phash::HashMatch;
pub use photo::PhotoRecord;
pub use service::PhotoSimilarity;
pub use tasks::{CancelFlag, PassControl, TaskUpdate};
