//! Health engine and knowledge store against a file-backed database

use autopilot_lib::engine::{score_snapshot, REPAIR_PATTERN_KIND};
use autopilot_lib::{AppConfig, HealthEngine, KnowledgeStore, StaticProbe, SystemSnapshot};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn file_engine(dir: &TempDir, probe: StaticProbe) -> HealthEngine {
    let store = Arc::new(KnowledgeStore::open(&dir.path().join("knowledge.db")).unwrap());
    let mut config = AppConfig::default();
    config.repair.temp_dir = dir.path().join("tmp");
    HealthEngine::new(Arc::new(probe), store, &config)
}

#[tokio::test]
async fn test_health_score_with_hot_cpu() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, StaticProbe::new(85.0, 50.0, 50.0, true));
    assert_eq!(engine.calculate_health_score().await.unwrap(), 80.0);
}

#[tokio::test]
async fn test_memory_prediction_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = file_engine(&dir, StaticProbe::new(10.0, 90.0, 10.0, true));
        let predictions = engine.predict_system_issues().await.unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].kind, "high_memory_usage");
        assert_eq!(predictions[0].confidence, 0.90);
    }

    let store = KnowledgeStore::open(&dir.path().join("knowledge.db")).unwrap();
    let stored = store.unresolved_predictions().unwrap();
    assert_eq!(stored.len(), 1);

    let id = stored[0].id.unwrap();
    store.resolve_prediction(id, "confirmed", Some(0.8)).unwrap();
    assert!(store.unresolved_predictions().unwrap().is_empty());
    let resolved = &store.recent_predictions(1).unwrap()[0];
    assert_eq!(resolved.outcome.as_deref(), Some("confirmed"));
    assert_eq!(resolved.payload["threshold"], 85.0);
}

#[tokio::test]
async fn test_pattern_identity_ignores_key_order() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, StaticProbe::healthy());

    engine
        .record_pattern("incident", &json!({"service": "db", "code": 7}), true)
        .unwrap();
    let second = engine
        .record_pattern("incident", &json!({"code": 7, "service": "db"}), false)
        .unwrap();

    assert_eq!(second.frequency, 2);
    assert_eq!(second.success_rate, 0.5);
    assert_eq!(engine.store().counts().unwrap().patterns, 1);
}

#[tokio::test]
async fn test_repeated_repairs_accumulate_patterns() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, StaticProbe::healthy());

    engine.auto_repair_system().await;
    engine.auto_repair_system().await;

    let patterns = engine.store().patterns(Some(REPAIR_PATTERN_KIND)).unwrap();
    assert_eq!(patterns.len(), 3);
    assert!(patterns.iter().all(|p| p.frequency == 2));
}

#[test]
fn test_score_never_leaves_range() {
    let config = AppConfig::default();
    for cpu in (0..=100).step_by(5) {
        for memory in (0..=100).step_by(5) {
            for reachable in [true, false] {
                let snapshot = SystemSnapshot {
                    cpu_percent: cpu as f64,
                    memory_percent: memory as f64,
                    disk_percent: 100.0 - memory as f64,
                    service_reachable: reachable,
                };
                let score = score_snapshot(&snapshot, &config.health).score;
                assert!((0.0..=100.0).contains(&score));
            }
        }
    }
}

#[test]
fn test_failing_probe_leaves_store_empty() {
    let dir = TempDir::new().unwrap();
    let engine = file_engine(&dir, StaticProbe::failing());

    let result = tokio_test::block_on(engine.calculate_health_score());

    tokio_test::assert_err!(result);
    assert_eq!(engine.store().counts().unwrap().metrics, 0);
}

#[test]
fn test_concurrent_pattern_writers_lose_no_updates() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(KnowledgeStore::open(&dir.path().join("knowledge.db")).unwrap());

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                // Half of the writers only ever fail
                let success = i % 2 == 0;
                for _ in 0..100 {
                    store
                        .upsert_pattern("task_outcome", &json!({ "task": "shared" }), success)
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let pattern = store
        .pattern("task_outcome", &json!({ "task": "shared" }))
        .unwrap()
        .unwrap();
    assert_eq!(pattern.frequency, 800);
    assert!((pattern.success_rate - 0.5).abs() < 1e-9);
    assert_eq!(store.counts().unwrap().patterns, 1);
}

#[test]
fn test_schema_version_is_public() {
    let dir = TempDir::new().unwrap();
    let store = KnowledgeStore::open(&dir.path().join("knowledge.db")).unwrap();
    assert_eq!(
        store.schema_version().unwrap(),
        Some(autopilot_lib::store::SCHEMA_VERSION)
    );
}
