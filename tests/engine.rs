//! End-to-end scenarios: ingest and retrieval through the manager, snapshot
//! round-trips across fresh managers, recall against brute force, fusion
//! arithmetic, and concurrent reader/writer interleaving.

use engram::{
    EpisodicBuffer, FusionWeights, IndexConfig, IndexManager, QueryConfig, QueryCoordinator,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn unit(xs: &[f32]) -> Vec<f32> {
    let norm: f32 = xs.iter().map(|x| x * x).sum::<f32>().sqrt();
    xs.iter().map(|x| x / norm).collect()
}

fn random_unit(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
    unit(&v)
}

fn manager_with(dim: usize) -> IndexManager {
    IndexManager::new(IndexConfig {
        embedding_dim: dim,
        auto_save: false,
        ..IndexConfig::default()
    })
    .unwrap()
}

#[test]
fn single_ingest_and_retrieve() {
    let manager = manager_with(4);
    manager
        .add_document("a", &[1.0, 0.0, 0.0, 0.0], "alpha", Value::Null)
        .unwrap();

    let results = manager.search(&[1.0, 0.0, 0.0, 0.0], 1, 0.0).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "alpha");
    assert!((results[0].similarity - 1.0).abs() < 1e-5);
}

#[test]
fn rank_order_with_known_similarities() {
    let manager = manager_with(2);
    manager
        .add_document("a", &[1.0, 0.0], "alpha", Value::Null)
        .unwrap();
    manager
        .add_document("b", &unit(&[0.9, 0.436]), "beta", Value::Null)
        .unwrap();
    manager
        .add_document("c", &[0.0, 1.0], "gamma", Value::Null)
        .unwrap();

    let results = manager.search(&[1.0, 0.0], 3, 0.0).unwrap();
    let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, vec!["alpha", "beta", "gamma"]);
    assert!((results[0].similarity - 1.0).abs() < 1e-5);
    assert!((results[1].similarity - 0.9).abs() < 0.01);
    assert!(results[2].similarity < 1e-5);
}

#[test]
fn threshold_filters_weak_matches() {
    let manager = manager_with(2);
    manager
        .add_document("a", &[1.0, 0.0], "alpha", Value::Null)
        .unwrap();
    manager
        .add_document("b", &unit(&[0.9, 0.436]), "beta", Value::Null)
        .unwrap();
    manager
        .add_document("c", &[0.0, 1.0], "gamma", Value::Null)
        .unwrap();

    let results = manager.search(&[1.0, 0.0], 3, 0.5).unwrap();
    let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, vec!["alpha", "beta"]);
    assert!(results.iter().all(|r| r.similarity >= 0.5));
}

#[test]
fn duplicate_insert_is_rejected() {
    let manager = manager_with(2);
    manager
        .add_document("a", &[1.0, 0.0], "first", Value::Null)
        .unwrap();
    assert!(manager
        .add_document("a", &[0.0, 1.0], "second", Value::Null)
        .is_err());
    assert_eq!(manager.document_count(), 1);
}

#[test]
fn snapshot_roundtrip_preserves_every_top10() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.hnsw");
    let mut rng = StdRng::seed_from_u64(42);
    let dim = 8;

    let config = IndexConfig {
        embedding_dim: dim,
        index_path: Some(path.clone()),
        auto_save: false,
        ..IndexConfig::default()
    };
    let manager = IndexManager::new(config.clone()).unwrap();
    for i in 0..100 {
        let v = random_unit(&mut rng, dim);
        manager
            .add_document(&format!("doc-{i}"), &v, &format!("content {i}"), Value::Null)
            .unwrap();
    }

    let queries: Vec<Vec<f32>> = (0..20).map(|_| random_unit(&mut rng, dim)).collect();
    let before: Vec<Vec<String>> = queries
        .iter()
        .map(|q| {
            manager
                .search(q, 10, 0.0)
                .unwrap()
                .into_iter()
                .map(|r| r.content)
                .collect()
        })
        .collect();

    manager.save().unwrap();

    // a fresh manager picks the snapshot up at construction
    let reopened = IndexManager::new(config).unwrap();
    assert_eq!(reopened.document_count(), 100);
    for (q, expected) in queries.iter().zip(&before) {
        let got: Vec<String> = reopened
            .search(q, 10, 0.0)
            .unwrap()
            .into_iter()
            .map(|r| r.content)
            .collect();
        assert_eq!(&got, expected);
    }
}

#[test]
fn save_clear_load_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idem.hnsw");
    let mut rng = StdRng::seed_from_u64(7);
    let dim = 8;

    let manager = IndexManager::new(IndexConfig {
        embedding_dim: dim,
        index_path: Some(path),
        auto_save: false,
        ..IndexConfig::default()
    })
    .unwrap();
    for i in 0..60 {
        manager
            .add_document(
                &format!("d{i}"),
                &random_unit(&mut rng, dim),
                &format!("c{i}"),
                Value::Null,
            )
            .unwrap();
    }
    let query = random_unit(&mut rng, dim);
    let before: Vec<(String, f32)> = manager
        .search(&query, 10, 0.0)
        .unwrap()
        .into_iter()
        .map(|r| (r.content, r.similarity))
        .collect();

    manager.save().unwrap();
    manager.clear();
    assert_eq!(manager.document_count(), 0);
    manager.load().unwrap();

    let after: Vec<(String, f32)> = manager
        .search(&query, 10, 0.0)
        .unwrap()
        .into_iter()
        .map(|r| (r.content, r.similarity))
        .collect();
    assert_eq!(before.len(), after.len());
    for ((c1, s1), (c2, s2)) in before.iter().zip(&after) {
        assert_eq!(c1, c2);
        assert!((s1 - s2).abs() < 1e-6);
    }
}

#[test]
fn recall_floor_against_brute_force() {
    let mut rng = StdRng::seed_from_u64(1234);
    let dim = 16;
    let n = 600;
    let manager = manager_with(dim);
    manager.set_ef_search(120);

    let mut vectors = Vec::with_capacity(n);
    for i in 0..n {
        let v = random_unit(&mut rng, dim);
        manager
            .add_document(&format!("d{i}"), &v, &format!("c{i}"), Value::Null)
            .unwrap();
        vectors.push(v);
    }

    let mut total_recall = 0.0f64;
    let trials = 20;
    for _ in 0..trials {
        let query = random_unit(&mut rng, dim);

        // exact top-10 by dot product, ties to the earlier insert
        let mut exact: Vec<(usize, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, v.iter().zip(&query).map(|(a, b)| a * b).sum::<f32>()))
            .collect();
        exact.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let truth: Vec<String> = exact.iter().take(10).map(|&(i, _)| format!("c{i}")).collect();

        let approx = manager.search(&query, 10, 0.0).unwrap();
        let hits = approx
            .iter()
            .filter(|r| truth.contains(&r.content))
            .count();
        total_recall += hits as f64 / 10.0;
    }
    let recall = total_recall / trials as f64;
    assert!(recall >= 0.9, "recall@10 too low: {recall}");
}

#[test]
fn episodic_fifo_keeps_only_newest() {
    let capacity = 32;
    let extra = 5;
    let buffer = EpisodicBuffer::new(2, capacity);
    for i in 0..capacity + extra {
        buffer
            .add_episode(
                &format!("q{i}"),
                &format!("r{i}"),
                &[1.0, 0.0],
                HashMap::new(),
            )
            .unwrap();
    }
    assert_eq!(buffer.len(), capacity);

    let hits = buffer.search(&[1.0, 0.0], capacity + extra).unwrap();
    let queries: Vec<&str> = hits.iter().map(|(e, _)| e.query.as_str()).collect();
    for i in 0..extra {
        assert!(!queries.contains(&format!("q{i}").as_str()));
    }
    for i in extra..capacity + extra {
        assert!(queries.contains(&format!("q{i}").as_str()));
    }
}

#[test]
fn fusion_merge_orders_shared_content_first() {
    // Scenario: "x" from two sources (0.8, 0.6) at weights 0.5/0.5 fuses to
    // 0.7; "y" from one source at 0.9 fuses to 0.45. Arrange real stores so
    // the coordinator reproduces that shape: identical rescaled scores with
    // one content shared between the vector and episodic sources.
    let manager = manager_with(2);
    manager
        .add_document("s", &[1.0, 0.0], "shared", Value::Null)
        .unwrap();
    let episodic = Arc::new(EpisodicBuffer::new(2, 8));
    episodic
        .add_episode("past", "shared", &[1.0, 0.0], HashMap::new())
        .unwrap();
    episodic
        .add_episode("other", "episodic only", &[0.98, 0.2], HashMap::new())
        .unwrap();

    let weights = FusionWeights {
        vector_weight: 0.5,
        episodic_weight: 0.5,
        semantic_weight: 0.0,
    };
    let coordinator =
        QueryCoordinator::new(Arc::new(manager), episodic, None, weights).unwrap();
    let response = coordinator
        .process_query("q", &[1.0, 0.0], &QueryConfig::default())
        .unwrap();

    assert_eq!(response.results[0].content, "shared");
    // shared content collects both weights; the single-source one cannot
    let shared = response.results[0].score;
    let single = response
        .results
        .iter()
        .find(|r| r.content == "episodic only")
        .unwrap()
        .score;
    assert!(shared > single);
    assert!(response.overall_confidence > 0.0 && response.overall_confidence <= 1.0);
}

#[test]
fn concurrent_writers_and_readers() {
    let manager = Arc::new(manager_with(4));
    let writers = 4;
    let docs_per_writer = 50;

    std::thread::scope(|scope| {
        for w in 0..writers {
            let manager = Arc::clone(&manager);
            scope.spawn(move || {
                for i in 0..docs_per_writer {
                    let v = unit(&[
                        (w as f32 + 1.0) * 0.3,
                        (i as f32 + 1.0) * 0.7,
                        1.0,
                        (w * i) as f32 * 0.01 + 0.1,
                    ]);
                    manager
                        .add_document(
                            &format!("w{w}-d{i}"),
                            &v,
                            &format!("writer {w} doc {i}"),
                            Value::Null,
                        )
                        .unwrap();
                }
            });
        }
        for _ in 0..2 {
            let manager = Arc::clone(&manager);
            scope.spawn(move || {
                for _ in 0..100 {
                    let results = manager.search(&[0.5, 0.5, 0.5, 0.5], 5, 0.0).unwrap();
                    assert!(results.len() <= 5);
                }
            });
        }
    });

    assert_eq!(manager.document_count(), writers * docs_per_writer);
    for w in 0..writers {
        for i in 0..docs_per_writer {
            assert!(manager.has_document(&format!("w{w}-d{i}")));
        }
    }
    // every successful add is observable by search
    let all = manager
        .search(&[0.5, 0.5, 0.5, 0.5], writers * docs_per_writer, 0.0)
        .unwrap();
    assert_eq!(all.len(), writers * docs_per_writer);
}

#[test]
fn load_from_missing_path_rolls_back() {
    let manager = manager_with(2);
    manager
        .add_document("keep", &[1.0, 0.0], "kept", Value::Null)
        .unwrap();

    let err = manager.load_from(std::path::Path::new("/no/such/snapshot.hnsw"), false);
    assert!(err.is_err());
    assert_eq!(manager.document_count(), 1);
    let results = manager.search(&[1.0, 0.0], 1, 0.0).unwrap();
    assert_eq!(results[0].content, "kept");
}
