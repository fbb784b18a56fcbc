//! End-to-end training runs against in-memory and JSONL record stores.

mod common;

use netguard_pipeline::{
    ErrorKind, JsonlRecordStore, MemoryRecordStore, PipelineConfig, PipelineError, ProgressEvent,
    RecordingProgressSink, RunStatus, SourceBackend, Stage, TrainingPipeline, stratified_split,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_hundred_records_train_promote_and_predict_held_out_rows() {
    let temp = TempDir::new().unwrap();
    let docs = common::network_documents(100);
    let store = Arc::new(MemoryRecordStore::new());
    store.insert_many(&common::collection(), docs.clone());

    let config = common::config(temp.path());
    let seed = config.training.seed;
    let pipeline = TrainingPipeline::new(config, store).unwrap();
    let record = pipeline.run_training().await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(record.promoted);
    let report = record.validation.as_ref().unwrap();
    assert!(report.accepted);
    assert_eq!(report.total_rows, 100);
    assert_eq!(report.accepted_rows, 100);
    assert!((report.column("port").unwrap().null_ratio - 0.05).abs() < 1e-12);
    assert!(record.eval_metrics.unwrap().f1 >= 0.7);
    assert_eq!(record.candidates.len(), 3);
    assert_eq!(record.drift.as_ref().unwrap().columns.len(), 30);

    // Reproduce the stratified 80/20 split to find the held-out rows.
    let labels = common::labels(&docs);
    let split = stratified_split(&labels, 0.2, seed).unwrap();
    assert_eq!(split.train.len(), 80);
    assert_eq!(split.eval.len(), 20);
    assert_eq!(split.eval.iter().filter(|&&i| labels[i] == 0).count(), 12);

    let held_out: Vec<_> = split.eval.iter().map(|&i| docs[i].clone()).collect();
    let outcome = pipeline.predict(&common::feature_table(&held_out)).unwrap();
    let correct = split.eval.iter().zip(outcome.predictions.iter()).filter(|&(&i, &p)| labels[i] == p).count();
    assert!(correct as f64 / 20.0 >= 0.7, "only {correct}/20 held-out rows correct");
    assert_eq!(outcome.summary.total, 20);
    assert_eq!(outcome.summary.safe + outcome.summary.not_safe, 20);

    let runs = pipeline.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, record.run_id);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_from_config_reads_jsonl_collection() {
    let temp = TempDir::new().unwrap();
    let data_root = temp.path().join("data");
    let mut config = common::config(&temp.path().join("artifacts"));
    config.source.backend = SourceBackend::Jsonl { root: data_root.clone() };
    JsonlRecordStore::new(&data_root)
        .write_collection(&config.source.collection_ref(), &common::network_documents(50))
        .unwrap();

    let sink = Arc::new(RecordingProgressSink::default());
    let pipeline = TrainingPipeline::from_config(config).unwrap().with_progress(sink.clone());
    let record = pipeline.run_training().await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);

    let finished: Vec<Stage> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProgressEvent::StageFinished { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        finished,
        vec![
            Stage::Ingestion,
            Stage::Validation,
            Stage::Transformation,
            Stage::Training,
            Stage::Persistence,
            Stage::Promotion
        ]
    );
}

#[tokio::test]
async fn test_missing_source_is_retryable_ingestion_failure() {
    let temp = TempDir::new().unwrap();
    let mut config = common::config(&temp.path().join("artifacts"));
    config.source.backend = SourceBackend::Jsonl { root: temp.path().join("nowhere") };

    let pipeline = TrainingPipeline::from_config(config).unwrap();
    let err = pipeline.run_training().await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Ingestion));
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    assert!(err.is_retryable());
    assert_eq!(pipeline.runs().unwrap()[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_excess_nulls_stop_the_run_before_fitting() {
    let temp = TempDir::new().unwrap();
    let mut docs = common::network_documents(100);
    for doc in docs.iter_mut().take(15) {
        doc.insert("SFH".to_string(), serde_json::Value::Null);
    }
    let store = Arc::new(MemoryRecordStore::new());
    store.insert_many(&common::collection(), docs);

    let pipeline = TrainingPipeline::new(common::config(temp.path()), store).unwrap();
    let err = pipeline.run_training().await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Validation));
    match err.root() {
        PipelineError::ValidationFailed { report, .. } => {
            assert!(!report.accepted);
            assert!((report.column("SFH").unwrap().null_ratio - 0.15).abs() < 1e-12);
        }
        other => panic!("unexpected error {other:?}"),
    }
    let record = &pipeline.runs().unwrap()[0];
    assert_eq!(record.failed_stage(), Some(Stage::Validation));
    assert!(record.algorithm.is_none());
    assert!(!temp.path().join("runs").exists() || std::fs::read_dir(temp.path().join("runs")).unwrap().count() == 0);
}

#[tokio::test]
async fn test_nested_field_is_a_schema_inference_failure() {
    let temp = TempDir::new().unwrap();
    let mut docs = common::network_documents(10);
    docs[3].insert("SFH".to_string(), json!({"nested": true}));
    let store = Arc::new(MemoryRecordStore::new());
    store.insert_many(&common::collection(), docs);

    let pipeline = TrainingPipeline::new(common::config(temp.path()), store).unwrap();
    let err = pipeline.run_training().await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Ingestion));
    assert_eq!(err.kind(), ErrorKind::SchemaInference);
}

#[tokio::test]
async fn test_auto_promote_disabled_leaves_final_slot_empty() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryRecordStore::new());
    store.insert_many(&common::collection(), common::network_documents(60));
    let config = PipelineConfig { auto_promote: false, ..common::config(temp.path()) };

    let pipeline = TrainingPipeline::new(config, store).unwrap();
    let record = pipeline.run_training().await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(!record.promoted);
    assert_eq!(pipeline.artifact_store().current_generation().unwrap(), None);

    assert_eq!(pipeline.promote(&record.run_id).unwrap(), 1);
    let outcome = pipeline.predict(&common::feature_table(&common::network_documents(5))).unwrap();
    assert_eq!(outcome.predictions.len(), 5);
}

#[tokio::test]
async fn test_unwritable_history_does_not_fail_a_promoted_run() {
    let temp = TempDir::new().unwrap();
    // A plain file where the records directory should be.
    std::fs::write(temp.path().join("records"), b"").unwrap();
    let store = Arc::new(MemoryRecordStore::new());
    store.insert_many(&common::collection(), common::network_documents(60));

    let pipeline = TrainingPipeline::new(common::config(temp.path()), store).unwrap();
    let record = pipeline.run_training().await.unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(record.promoted);
    assert!(pipeline.runs().is_err());

    let outcome = pipeline.predict(&common::feature_table(&common::network_documents(5))).unwrap();
    assert_eq!(outcome.summary.total, 5);
}
