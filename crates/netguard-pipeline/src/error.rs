use crate::validation::ValidationReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage an error or progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Validation,
    Transformation,
    Training,
    Persistence,
    Promotion,
    Prediction,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Validation => "validation",
            Self::Transformation => "transformation",
            Self::Training => "training",
            Self::Persistence => "persistence",
            Self::Promotion => "promotion",
            Self::Prediction => "prediction",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, machine-readable classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    SchemaInference,
    SchemaMismatch,
    ValidationFailed,
    TrainingBelowThreshold,
    ArtifactNotFound,
    ArtifactConflict,
    ModelNotReady,
    CorruptArtifact,
    InvalidConfig,
    Estimator,
    Internal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("record source {source_ref} unavailable: {reason}")]
    SourceUnavailable { source_ref: String, reason: String },

    #[error("cannot infer schema at {column}: {detail}")]
    SchemaInference { column: String, detail: String },

    #[error("schema mismatch on column `{column}`: {detail}")]
    SchemaMismatch { column: String, detail: String },

    #[error("validation failed: {summary}")]
    ValidationFailed { summary: String, report: Box<ValidationReport> },

    #[error("run {run_id}: evaluation f1 {f1:.4} is below the required {threshold:.4}")]
    TrainingBelowThreshold { run_id: String, f1: f64, threshold: f64 },

    #[error("no artifact bundle in slot `{slot}`")]
    ArtifactNotFound { slot: String },

    #[error("artifact bundle for run {run_id} already exists")]
    ArtifactConflict { run_id: String },

    #[error("no promoted model bundle is available")]
    ModelNotReady,

    #[error("corrupt artifact {}: {detail}", path.display())]
    CorruptArtifact { path: PathBuf, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("estimator error: {0}")]
    Estimator(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("run {run_id} failed during {stage}: {source}")]
    StageFailed {
        run_id: String,
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Self::SchemaInference { .. } => ErrorKind::SchemaInference,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::TrainingBelowThreshold { .. } => ErrorKind::TrainingBelowThreshold,
            Self::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            Self::ArtifactConflict { .. } => ErrorKind::ArtifactConflict,
            Self::ModelNotReady => ErrorKind::ModelNotReady,
            Self::CorruptArtifact { .. } => ErrorKind::CorruptArtifact,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Estimator(_) => ErrorKind::Estimator,
            Self::StageFailed { source, .. } => source.kind(),
            Self::LockPoisoned(_) | Self::Io(_) | Self::Json(_) | Self::Csv(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only an unreachable source is worth retrying without fixing inputs.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::SourceUnavailable
    }

    /// Stage that failed, for errors wrapped by a training run.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, unwrapping [`PipelineError::StageFailed`].
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn mismatch(column: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch { column: column.into(), detail: detail.into() }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        Self::CorruptArtifact { path: path.into(), detail: detail.to_string() }
    }
}
