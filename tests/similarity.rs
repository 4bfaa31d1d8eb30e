use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use photosim::config::{EarlyStop, SimilarityConfig};
use photosim::features::{FilePixelSource, PixelSource};
use photosim::photo::{AiTags, CameraInfo};
use photosim::store::SqliteStore;
use photosim::{Error, Feature, PhotoRecord, SimilarityEngine};

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 8, 14)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

fn engine_with(photos: &[PhotoRecord], config: SimilarityConfig) -> SimilarityEngine {
    let store = SqliteStore::open_in_memory().unwrap();
    for photo in photos {
        store.insert_photo(photo).unwrap();
    }
    let pixels: Arc<dyn PixelSource> = Arc::new(FilePixelSource::default());
    SimilarityEngine::new(Arc::new(store), pixels, config)
}

/// A mixed library around photo 1: varying capture times, places, cameras
/// and tags.
fn library() -> Vec<PhotoRecord> {
    let scenes = ["beach", "sandy beach", "mountain", "city street"];
    let objects = ["dog", "ball", "umbrella", "car", "tree"];
    let makes = ["Fujifilm", "Canon", "Sony"];

    (1..=40i64)
        .map(|id| {
            let i = id as usize;
            let hash = format!("{:016x}", 0xffd8_a1b2_c3d4_e5f6u64 ^ ((1u64 << (i % 64)) - 1));
            PhotoRecord::new(id)
                .with_hash(hash)
                .with_taken_at(base_time() + Duration::hours((i * i) as i64 % 900))
                .with_location(36.5 + (i % 7) as f64 * 0.05, -4.9 + (i % 5) as f64 * 0.07)
                .with_camera(CameraInfo {
                    make: Some(makes[i % makes.len()].to_string()),
                    model: Some(format!("Model {}", i % 4)),
                    focal_length: Some(18.0 + (i % 6) as f64 * 7.0),
                    aperture: Some(1.8 + (i % 3) as f64),
                    ..Default::default()
                })
                .with_ai_tags(AiTags {
                    scene_type: Some(scenes[i % scenes.len()].to_string()),
                    objects: vec![
                        objects[i % objects.len()].to_string(),
                        objects[(i / 2) % objects.len()].to_string(),
                    ],
                    emotion: Some(if i % 2 == 0 { "joyful" } else { "calm" }.to_string()),
                    activity: None,
                    description: Some(format!(
                        "A {} scene with a {}",
                        scenes[i % scenes.len()],
                        objects[i % objects.len()]
                    )),
                    tags: vec!["summer".to_string()],
                })
                .with_tags([format!("album{}", i % 3)])
        })
        .collect()
}

#[test]
fn identical_hashes_are_exact_duplicates() {
    let photos = vec![
        PhotoRecord::new(1).with_hash("ffd8a1b2c3d4e5f6"),
        PhotoRecord::new(2).with_hash("ffd8a1b2c3d4e5f6"),
        PhotoRecord::new(3).with_hash("0123456789abcdef"),
    ];
    let engine = engine_with(&photos, SimilarityConfig::default());

    let matches = engine.find_near_duplicates(1, 0.95, 10).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].photo_id, 2);
    assert_eq!(matches[0].similarity, 1.0);
    assert_eq!(matches[0].distance, 0);
}

#[test]
fn mismatched_hash_lengths_never_match() {
    let photos = vec![
        PhotoRecord::new(1).with_hash("ffd8a1b2c3d4e5f6"),
        PhotoRecord::new(2).with_hash("ffd8a1b2"),
        PhotoRecord::new(3).with_hash("ffd8a1b2c3d4e5f6ffd8a1b2c3d4e5f6"),
        PhotoRecord::new(4).with_hash("not-a-hash-at-all"),
    ];
    let engine = engine_with(&photos, SimilarityConfig::default());

    assert!(engine.find_near_duplicates(1, 0.0, 10).unwrap().is_empty());
    let scores = engine.score_pair(1, 2).unwrap();
    assert_eq!(scores.get(Feature::PerceptualHash), None);
}

#[test]
fn camera_only_match_surfaces_without_time_or_location() {
    let camera = CameraInfo {
        model: Some("X100V".to_string()),
        ..Default::default()
    };
    let photos = vec![
        PhotoRecord::new(1)
            .with_hash("ffd8a1b2c3d4e5f6")
            .with_camera(camera.clone()),
        // 8-digit hash: passes the "any hash" pre-screen but cannot be compared.
        PhotoRecord::new(2).with_hash("ffd8a1b2").with_camera(camera),
        PhotoRecord::new(3).with_camera(CameraInfo {
            model: Some("X100V".to_string()),
            ..Default::default()
        }),
    ];

    let engine = engine_with(&photos, SimilarityConfig::default());
    let results = engine.find_similar(1, 0.6, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].photo_id, 2);
    assert_eq!(results[0].per_feature.get(Feature::Camera), Some(1.0));
    assert_eq!(results[0].per_feature.get(Feature::PerceptualHash), None);
    assert_eq!(results[0].aggregate_similarity, 1.0);

    let strict = SimilarityConfig {
        time_stop: EarlyStop::new(0.0).required(),
        ..Default::default()
    };
    let engine = engine_with(&photos, strict);
    assert!(engine.find_similar(1, 0.6, 10).unwrap().is_empty());
}

#[test]
fn raising_threshold_never_adds_results() {
    let engine = engine_with(&library(), SimilarityConfig::default());

    let mut previous = usize::MAX;
    for step in 0..=20 {
        let threshold = step as f32 / 20.0;
        let count = engine.find_similar(1, threshold, 25).unwrap().len();
        assert!(
            count <= previous,
            "threshold {} returned {} results, previous {}",
            threshold,
            count,
            previous
        );
        previous = count;
    }
}

#[test]
fn results_are_ranked_and_bounded() {
    let engine = engine_with(&library(), SimilarityConfig::default());
    let results = engine.find_similar(1, 0.3, 10).unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 10);
    assert!(results.iter().all(|r| r.photo_id != 1));
    assert!(results
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.aggregate_similarity)));
    for pair in results.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.aggregate_similarity > b.aggregate_similarity
                || (a.aggregate_similarity == b.aggregate_similarity && a.photo_id < b.photo_id)
        );
    }
}

#[test]
fn fused_score_is_symmetric() {
    let engine = engine_with(&library(), SimilarityConfig::default());
    for (a, b) in [(1, 2), (3, 17), (8, 40), (12, 13)] {
        let ab = engine.score_pair(a, b).unwrap();
        let ba = engine.score_pair(b, a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(engine.aggregate(&ab), engine.aggregate(&ba));
    }
}

#[test]
fn self_comparison_scores_one() {
    let engine = engine_with(&library(), SimilarityConfig::default());
    let scores = engine.score_pair(5, 5).unwrap();
    assert!(scores.computed_count() > 0);
    for (feature, score) in scores.iter() {
        assert!((score - 1.0).abs() < 1e-5, "{} scored {}", feature.name(), score);
    }
}

#[test]
fn pipelined_layers_match_full_search() {
    let engine = engine_with(&library(), SimilarityConfig::default());

    let shortlist = engine.layer1_only(1, 0.4, 10).unwrap();
    assert!(!shortlist.is_empty());
    assert!(shortlist.iter().all(|r| r.layer2_score.is_none()));

    let layered = engine.layer2_candidates(1, shortlist).unwrap();
    let mut full = engine.find_similar(1, 0.4, 10).unwrap();
    full.truncate(layered.len());
    assert_eq!(
        layered.iter().take(full.len()).map(|r| r.photo_id).collect::<Vec<_>>(),
        full.iter().map(|r| r.photo_id).collect::<Vec<_>>()
    );
}

#[test]
fn oversized_time_window_falls_back_to_location() {
    let config = SimilarityConfig {
        time_window_hours: i64::MAX / 1000,
        ..Default::default()
    };
    let engine = engine_with(&library(), config);

    let results = engine.find_similar(1, 0.5, 10).unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.photo_id != 1));

    // Time-only reference: no window at all, so any hashed photo qualifies.
    let photos = vec![
        PhotoRecord::new(1)
            .with_hash("ffd8a1b2c3d4e5f6")
            .with_taken_at(base_time()),
        PhotoRecord::new(2).with_hash("ffd8a1b2c3d4e5f7"),
    ];
    let engine = engine_with(
        &photos,
        SimilarityConfig {
            time_window_hours: i64::MAX,
            ..Default::default()
        },
    );
    let shortlist = engine.layer1_only(1, 0.5, 10).unwrap();
    assert_eq!(shortlist.len(), 1);
    assert_eq!(shortlist[0].photo_id, 2);
}

#[test]
fn unknown_reference_is_an_error() {
    let engine = engine_with(&library(), SimilarityConfig::default());
    assert!(matches!(engine.find_similar(999, 0.5, 5), Err(Error::PhotoNotFound(999))));
    assert!(matches!(engine.layer1_only(999, 0.5, 5), Err(Error::PhotoNotFound(999))));
}
