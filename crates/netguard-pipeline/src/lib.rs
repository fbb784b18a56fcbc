//! NetGuard Pipeline
//!
//! Training and serving for a binary network traffic classifier:
//! - Reading raw records from a document store (`RecordStoreClient`)
//! - Validating and transforming them into feature matrices
//! - Fitting, selecting and evaluating estimators (`ModelTrainer`)
//! - Persisting versioned artifact bundles and promoting them (`ArtifactStore`)
//! - Predicting with the promoted bundle (`PredictionService`)
//!
//! `TrainingPipeline` is the caller-facing entry point.

pub mod artifacts;
pub mod config;
pub mod drift;
pub mod envelope;
pub mod error;
pub mod estimator;
pub mod history;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod prediction;
pub mod progress;
pub mod schema;
pub mod store;
pub mod table;
pub mod trainer;
pub mod transform;
pub mod validation;

pub use artifacts::{ArtifactBundle, ArtifactStore, BundleEvaluation, BundleManifest, PromotionHook};
pub use config::{
    ArtifactsConfig, PipelineConfig, SourceBackend, SourceConfig, TrainingConfig, TransformConfig, ValidationConfig,
};
pub use drift::{ColumnDrift, DriftReport, detect_drift};
pub use envelope::{Envelope, EnvelopeError};
pub use error::{ErrorKind, PipelineError, PipelineResult, Stage};
pub use estimator::{DecisionTree, Estimator, EstimatorRegistry, EstimatorSpec, LogisticRegression, RandomForest};
pub use history::{ErrorDetail, RunHistory, RunId, RunRecorder, RunStatus, TrainingRunRecord};
pub use layout::ArtifactLayout;
pub use metrics::{ConfusionMatrix, EvaluationMetrics};
pub use pipeline::TrainingPipeline;
pub use prediction::{BundleCache, PredictionOutcome, PredictionService, PredictionSummary};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use schema::{ColumnKind, ColumnSpec, ExpectedSchema, Label, NETWORK_FEATURES, NETWORK_TARGET, TargetSpec};
pub use store::{
    CollectionRef, HttpRecordStore, JsonlRecordStore, MemoryRecordStore, MongoRecordStore, RecordStore, RecordStoreClient,
};
pub use table::{Document, Table, Value};
pub use trainer::{CandidateScore, ModelTrainer, SplitIndices, TrainingOutcome, stratified_split};
pub use transform::{
    CategoricalEncoding, DataTransformer, FeatureMatrix, PreprocessingTransform, TargetVector, transform,
};
pub use validation::{DataValidator, ValidationIssue, ValidationReport};
