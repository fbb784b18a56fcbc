//! Training run identity and the append-only run history.

use crate::drift::DriftReport;
use crate::error::{ErrorKind, PipelineError, PipelineResult, Stage};
use crate::layout::{ArtifactLayout, write_atomic};
use crate::metrics::EvaluationMetrics;
use crate::trainer::{CandidateScore, TrainingOutcome};
use crate::validation::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Identifier for a training run: `<yyyymmdd>-<hhmmss>-<8 hex>`.
///
/// Run ids become directory and file names, so only `[A-Za-z0-9_-]` is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8]))
    }

    pub fn parse(value: &str) -> PipelineResult<Self> {
        let valid = !value.is_empty()
            && value.len() <= 128
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PipelineError::InvalidConfig(format!("invalid run id `{value}`")));
        }
        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for RunId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl std::str::FromStr for RunId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    BelowThreshold,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::BelowThreshold => "below_threshold",
            Self::Failed => "failed",
        }
    }
}

/// Structured failure cause stored on a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub detail: String,
}

/// Immutable summary of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRunRecord {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub validation: Option<ValidationReport>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub candidates: Vec<CandidateScore>,
    #[serde(default)]
    pub train_metrics: Option<EvaluationMetrics>,
    #[serde(default)]
    pub eval_metrics: Option<EvaluationMetrics>,
    pub min_f1: f64,
    #[serde(default)]
    pub overfit: bool,
    #[serde(default)]
    pub drift: Option<DriftReport>,
    #[serde(default)]
    pub promoted: bool,
}

impl TrainingRunRecord {
    #[must_use]
    pub fn failed_stage(&self) -> Option<Stage> {
        self.error.as_ref().map(|e| e.stage)
    }
}

/// Collects run details while a run is in progress.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    run_id: RunId,
    started_at: DateTime<Utc>,
    min_f1: f64,
    source: Option<String>,
    validation: Option<ValidationReport>,
    algorithm: Option<String>,
    candidates: Vec<CandidateScore>,
    train_metrics: Option<EvaluationMetrics>,
    eval_metrics: Option<EvaluationMetrics>,
    overfit: bool,
    drift: Option<DriftReport>,
    promoted: bool,
}

impl RunRecorder {
    #[must_use]
    pub fn new(run_id: RunId, min_f1: f64) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            min_f1,
            source: None,
            validation: None,
            algorithm: None,
            candidates: Vec::new(),
            train_metrics: None,
            eval_metrics: None,
            overfit: false,
            drift: None,
            promoted: false,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn record_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub fn record_validation(&mut self, report: ValidationReport) {
        self.validation = Some(report);
    }

    pub fn record_training(&mut self, outcome: &TrainingOutcome) {
        self.algorithm = Some(outcome.algorithm().to_string());
        self.candidates.clone_from(&outcome.candidates);
        self.train_metrics = Some(outcome.train_metrics);
        self.eval_metrics = Some(outcome.eval_metrics);
        self.overfit = outcome.overfit;
        self.drift = Some(outcome.drift.clone());
    }

    pub fn record_promoted(&mut self) {
        self.promoted = true;
    }

    #[must_use]
    pub fn finish(self, status: RunStatus) -> TrainingRunRecord {
        self.freeze(status, None)
    }

    #[must_use]
    pub fn fail(self, stage: Stage, error: &PipelineError) -> TrainingRunRecord {
        let detail = ErrorDetail { kind: error.kind(), stage, detail: error.to_string() };
        self.freeze(RunStatus::Failed, Some(detail))
    }

    fn freeze(self, status: RunStatus, error: Option<ErrorDetail>) -> TrainingRunRecord {
        TrainingRunRecord {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            status,
            error,
            source: self.source,
            validation: self.validation,
            algorithm: self.algorithm,
            candidates: self.candidates,
            train_metrics: self.train_metrics,
            eval_metrics: self.eval_metrics,
            min_f1: self.min_f1,
            overfit: self.overfit,
            drift: self.drift,
            promoted: self.promoted,
        }
    }
}

/// Append-only store of [`TrainingRunRecord`]s under `records/`.
#[derive(Debug, Clone)]
pub struct RunHistory {
    layout: ArtifactLayout,
}

impl RunHistory {
    #[must_use]
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    /// Persist a record. A record is written exactly once.
    pub fn append(&self, record: &TrainingRunRecord) -> PipelineResult<()> {
        std::fs::create_dir_all(self.layout.records_dir())?;
        let path = self.layout.record_path(&record.run_id);
        if path.exists() {
            return Err(PipelineError::ArtifactConflict { run_id: record.run_id.to_string() });
        }
        write_atomic(&path, &serde_json::to_vec_pretty(record)?)?;
        debug!(run_id = %record.run_id, status = record.status.as_str(), "recorded training run");
        Ok(())
    }

    pub fn get(&self, run_id: &RunId) -> PipelineResult<TrainingRunRecord> {
        let path = self.layout.record_path(run_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::ArtifactNotFound { slot: format!("records/{run_id}") });
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::corrupt(path, e))
    }

    /// Every recorded run, oldest first.
    pub fn list(&self) -> PipelineResult<Vec<TrainingRunRecord>> {
        let dir = match std::fs::read_dir(self.layout.records_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in dir {
            let path = entry?.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !path.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if !is_record {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            let record: TrainingRunRecord =
                serde_json::from_slice(&bytes).map_err(|e| PipelineError::corrupt(&path, e))?;
            records.push(record);
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(records)
    }
}
