//! Prediction behaviour against fresh and trained pipelines.

mod common;

use netguard_pipeline::{
    ErrorKind, MemoryRecordStore, NETWORK_FEATURES, PipelineError, Table, TrainingPipeline, Value,
    prediction::{PREDICTION_COLUMN, STATUS_COLUMN},
};
use std::sync::Arc;
use tempfile::TempDir;

fn fresh_pipeline(temp: &TempDir) -> TrainingPipeline {
    TrainingPipeline::new(common::config(temp.path()), Arc::new(MemoryRecordStore::new())).unwrap()
}

async fn trained_pipeline(temp: &TempDir) -> TrainingPipeline {
    let store = Arc::new(MemoryRecordStore::new());
    store.insert_many(&common::collection(), common::network_documents(60));
    let pipeline = TrainingPipeline::new(common::config(temp.path()), store).unwrap();
    pipeline.run_training().await.unwrap();
    pipeline
}

#[test]
fn test_empty_input_needs_no_model() {
    let temp = TempDir::new().unwrap();
    let pipeline = fresh_pipeline(&temp);

    let columns = NETWORK_FEATURES.iter().map(ToString::to_string).collect();
    let outcome = pipeline.predict(&Table::new(columns)).unwrap();
    assert!(outcome.predictions.is_empty());
    assert_eq!(outcome.summary.total, 0);
    assert!(outcome.table.is_empty());
    assert!(outcome.table.column_index(PREDICTION_COLUMN).is_some());
    assert!(outcome.table.column_index(STATUS_COLUMN).is_some());
}

#[test]
fn test_predict_before_any_promotion_is_model_not_ready() {
    let temp = TempDir::new().unwrap();
    let pipeline = fresh_pipeline(&temp);

    let err = pipeline.predict(&common::feature_table(&common::network_documents(4))).unwrap_err();
    assert!(matches!(err, PipelineError::ModelNotReady));
    assert_eq!(err.kind(), ErrorKind::ModelNotReady);
}

#[tokio::test]
async fn test_output_table_carries_codes_and_statuses() {
    let temp = TempDir::new().unwrap();
    let pipeline = trained_pipeline(&temp).await;

    let docs = common::network_documents(10);
    let input = common::feature_table(&docs);
    let outcome = pipeline.predict(&input).unwrap();

    assert_eq!(outcome.table.len(), 10);
    assert_eq!(outcome.table.columns().len(), input.columns().len() + 2);
    for (row, &code) in outcome.predictions.iter().enumerate() {
        assert_eq!(outcome.table.value(row, PREDICTION_COLUMN), Some(&Value::Number(f64::from(code))));
        let status = if code == 1 { "not_safe" } else { "safe" };
        assert_eq!(outcome.table.value(row, STATUS_COLUMN), Some(&Value::from(status)));
    }
    assert_eq!(outcome.summary.safe + outcome.summary.not_safe, 10);
}

#[tokio::test]
async fn test_missing_feature_column_is_schema_mismatch() {
    let temp = TempDir::new().unwrap();
    let pipeline = trained_pipeline(&temp).await;

    let mut docs = common::network_documents(5);
    for doc in &mut docs {
        doc.remove("SFH");
    }
    match pipeline.predict(&common::feature_table(&docs)).unwrap_err() {
        PipelineError::SchemaMismatch { column, .. } => assert_eq!(column, "SFH"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_column_is_schema_mismatch() {
    let temp = TempDir::new().unwrap();
    let pipeline = trained_pipeline(&temp).await;

    let input = common::feature_table(&common::network_documents(5));
    let extra = vec![Value::from("x"); input.len()];
    let input = input.with_column("session_note", extra).unwrap();
    match pipeline.predict(&input).unwrap_err() {
        PipelineError::SchemaMismatch { column, .. } => assert_eq!(column, "session_note"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_target_column_in_input_is_ignored() {
    let temp = TempDir::new().unwrap();
    let pipeline = trained_pipeline(&temp).await;

    let docs = common::network_documents(8);
    let with_target = Table::from_documents(&docs, "_id").unwrap();
    let without_target = common::feature_table(&docs);
    assert_eq!(
        pipeline.predict(&with_target).unwrap().predictions,
        pipeline.predict(&without_target).unwrap().predictions
    );
}
