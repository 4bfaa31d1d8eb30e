use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::Arc;

use photosim::config::ClusteringConfig;
use photosim::store::{ClusterStore, SqliteStore};
use photosim::{CancelFlag, ClusterEngine, Error, PassControl, PhotoRecord, TaskUpdate};

const DIM: usize = 64;

fn basis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i] = 1.0;
    v
}

fn axpy(a: f32, x: &[f32], y: &[f32]) -> Vec<f32> {
    x.iter().zip(y).map(|(x, y)| a * x + y).collect()
}

/// Small deterministic generator so fixtures do not need a RNG crate.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32) - 0.5
    }
}

fn store_with(embeddings: &[(i64, Vec<f32>)]) -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    for (id, embedding) in embeddings {
        store
            .insert_photo(&PhotoRecord::new(*id).with_embedding(embedding.clone()))
            .unwrap();
    }
    Arc::new(store)
}

/// Every stored cluster as its member ids (ordered by photo id).
fn partition(store: &SqliteStore) -> BTreeSet<Vec<i64>> {
    store
        .list_clusters()
        .unwrap()
        .iter()
        .map(|c| {
            store
                .cluster_members(c.id)
                .unwrap()
                .iter()
                .map(|m| m.photo_id)
                .collect()
        })
        .collect()
}

/// Two groups of 30 whose cross similarity (0.77) sits between the base
/// threshold and the first tightened one.
fn two_close_groups() -> Vec<(i64, Vec<f32>)> {
    let a = basis(0);
    let orthogonal: Vec<f32> = basis(1)
        .iter()
        .map(|v| v * (1.0f32 - 0.77 * 0.77).sqrt())
        .collect();
    let b = axpy(0.77, &basis(0), &orthogonal);

    let mut embeddings = Vec::new();
    for i in 0..30 {
        embeddings.push((i as i64 + 1, axpy(0.01, &basis(2 + i), &a)));
        embeddings.push((i as i64 + 101, axpy(0.01, &basis(32 + i), &b)));
    }
    embeddings
}

/// Several blobs of different sizes and spreads around random directions.
fn mixed_library() -> Vec<(i64, Vec<f32>)> {
    let mut rng = Lcg(42);
    let mut embeddings = Vec::new();
    let mut id = 1;
    for (size, spread) in [(40usize, 0.05f32), (25, 0.1), (12, 0.02), (6, 0.3), (3, 0.01)] {
        let center: Vec<f32> = (0..DIM).map(|_| rng.next_f32()).collect();
        for _ in 0..size {
            let noise: Vec<f32> = (0..DIM).map(|_| rng.next_f32() * spread).collect();
            embeddings.push((id, axpy(1.0, &noise, &center)));
            id += 1;
        }
    }
    for _ in 0..10 {
        embeddings.push((id, (0..DIM).map(|_| rng.next_f32()).collect()));
        id += 1;
    }
    embeddings
}

#[test]
fn oversized_cluster_is_split_below_ceiling() {
    let store = store_with(&two_close_groups());
    let config = ClusteringConfig {
        similarity_threshold: 0.75,
        max_cluster_size: 50,
        ..Default::default()
    };
    let engine = ClusterEngine::new(store.clone(), config);
    let summary = engine.run_clustering_pass(&PassControl::default()).unwrap();

    assert!(summary.converged);
    assert_eq!(summary.refinements_applied, 1);
    assert!(summary.clusters_created >= 2);

    let clusters = store.list_clusters().unwrap();
    assert!(clusters.iter().all(|c| c.member_count <= 50));
    let total: usize = clusters.iter().map(|c| c.member_count).sum();
    assert_eq!(total, 60);

    let groups = partition(&store);
    assert!(groups.contains(&(1..=30).collect::<Vec<i64>>()));
    assert!(groups.contains(&(101..=130).collect::<Vec<i64>>()));
}

#[test]
fn single_usable_embedding_never_forms_a_cluster() {
    let store = store_with(&[(1, basis(0)), (2, vec![0.0; DIM])]);
    store.insert_photo(&PhotoRecord::new(3)).unwrap();
    let mut bad = basis(0);
    bad[5] = f32::NAN;
    store.insert_photo(&PhotoRecord::new(4).with_embedding(bad)).unwrap();

    let engine = ClusterEngine::new(store.clone(), ClusteringConfig::default());
    let summary = engine.run_clustering_pass(&PassControl::default()).unwrap();

    assert_eq!(summary.photos_considered, 1);
    assert_eq!(summary.clusters_created, 0);
    assert!(store.list_clusters().unwrap().is_empty());
    for id in 1..=4 {
        assert!(engine.get_cluster_for_photo(id).unwrap().is_none());
    }
}

#[test]
fn invalid_member_is_left_out_of_its_cluster() {
    let store = store_with(&[
        (1, basis(0)),
        (2, axpy(0.01, &basis(1), &basis(0))),
        (3, vec![1.0; DIM / 2]),
    ]);
    let engine = ClusterEngine::new(store.clone(), ClusteringConfig::default());
    engine.run_clustering_pass(&PassControl::default()).unwrap();

    assert_eq!(partition(&store), BTreeSet::from([vec![1, 2]]));
    assert!(engine.get_cluster_for_photo(3).unwrap().is_none());
}

#[test]
fn pass_produces_a_partition() {
    let embeddings = mixed_library();
    let store = store_with(&embeddings);
    let config = ClusteringConfig {
        similarity_threshold: 0.6,
        max_cluster_size: 15,
        ..Default::default()
    };
    let ceiling = config.max_cluster_size;
    let engine = ClusterEngine::new(store.clone(), config);
    let summary = engine.run_clustering_pass(&PassControl::default()).unwrap();

    let clusters = store.list_clusters().unwrap();
    let mut seen = BTreeSet::new();
    for cluster in &clusters {
        let members = store.cluster_members(cluster.id).unwrap();
        assert_eq!(cluster.member_count, members.len());
        assert!(cluster.member_count >= 2);
        assert!((0.0..=1.0).contains(&cluster.confidence_score));
        for member in members {
            assert!(seen.insert(member.photo_id), "photo {} in two clusters", member.photo_id);
            assert!((0.0..=1.0).contains(&member.similarity_to_cluster));
        }
        let representative = cluster.representative_photo_id.unwrap();
        assert_eq!(
            engine.get_cluster_for_photo(representative).unwrap().map(|c| c.id),
            Some(cluster.id)
        );
    }
    assert_eq!(summary.photos_clustered, seen.len());
    assert!(seen.len() <= embeddings.len());

    let oversized = clusters.iter().any(|c| c.member_count > ceiling);
    assert!(!oversized || !summary.converged);
}

#[test]
fn rerunning_reproduces_the_partition() {
    let store = store_with(&mixed_library());
    let config = ClusteringConfig {
        similarity_threshold: 0.6,
        max_cluster_size: 15,
        ..Default::default()
    };
    let engine = ClusterEngine::new(store.clone(), config);

    let first_summary = engine.run_clustering_pass(&PassControl::default()).unwrap();
    let first = partition(&store);
    let first_ids: Vec<i64> = store.list_clusters().unwrap().iter().map(|c| c.id).collect();

    let second_summary = engine.run_clustering_pass(&PassControl::default()).unwrap();
    let second = partition(&store);
    let second_ids: Vec<i64> = store.list_clusters().unwrap().iter().map(|c| c.id).collect();

    assert_eq!(first, second);
    assert_eq!(first_summary.clusters_created, second_summary.clusters_created);
    assert!(first_ids.iter().all(|id| !second_ids.contains(id)));
}

#[test]
fn memory_budget_failure_is_retriable() {
    let store = store_with(&two_close_groups());
    let config = ClusteringConfig {
        memory_limit_bytes: 1024,
        ..Default::default()
    };
    let engine = ClusterEngine::new(store, config);

    let (tx, rx) = mpsc::channel();
    let err = engine
        .run_clustering_pass(&PassControl::default().with_updates(tx))
        .unwrap_err();
    assert!(err.is_retriable());
    assert!(err.to_string().contains("smaller working set"));
    assert!(rx
        .try_iter()
        .any(|u| matches!(u, TaskUpdate::Failed { .. })));
}

#[test]
fn cancellation_stops_after_initial_partition() {
    let store = store_with(&two_close_groups());
    let config = ClusteringConfig {
        similarity_threshold: 0.75,
        ..Default::default()
    };
    let engine = ClusterEngine::new(store.clone(), config);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = engine.run_clustering_pass(&PassControl::new(cancel));
    assert!(matches!(result, Err(Error::Cancelled)));

    // The unrefined initial cluster survives.
    let clusters = store.list_clusters().unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].member_count, 60);
}
