//! Caller-facing entry point tying every stage together.

use crate::artifacts::{ArtifactBundle, ArtifactStore, BundleEvaluation};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::history::{RunHistory, RunId, RunRecorder, RunStatus, TrainingRunRecord};
use crate::layout::ArtifactLayout;
use crate::prediction::{PredictionOutcome, PredictionService};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::store::{RecordStore, RecordStoreClient};
use crate::table::Table;
use crate::trainer::ModelTrainer;
use crate::transform::DataTransformer;
use crate::validation::DataValidator;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

type StageResult<T> = Result<T, (Stage, PipelineError)>;

fn at<T>(stage: Stage, result: PipelineResult<T>) -> StageResult<T> {
    result.map_err(|e| (stage, e))
}

pub struct TrainingPipeline {
    config: PipelineConfig,
    client: RecordStoreClient,
    store: Arc<ArtifactStore>,
    history: RunHistory,
    prediction: PredictionService,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for TrainingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingPipeline").field("config", &self.config).finish_non_exhaustive()
    }
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig, record_store: Arc<dyn RecordStore>) -> PipelineResult<Self> {
        config.validate()?;
        let layout = ArtifactLayout::new(config.artifacts.root.clone());
        let store = Arc::new(ArtifactStore::new(layout.clone()));
        let prediction = PredictionService::new(Arc::clone(&store))?;
        Ok(Self {
            client: RecordStoreClient::new(record_store, config.source.timeout()),
            history: RunHistory::new(layout),
            store,
            prediction,
            progress: Arc::new(TracingProgressSink),
            config,
        })
    }

    /// Build the record store named by `config.source.backend`.
    pub fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        let record_store = config.source.build_store()?;
        Self::new(config, record_store)
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn artifact_store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Run ingestion through persistence (and promotion when enabled).
    ///
    /// Below-threshold runs succeed with [`RunStatus::BelowThreshold`]. A failed
    /// stage is recorded in the run history before the error is returned.
    /// History write failures are logged, never returned.
    pub async fn run_training(&self) -> PipelineResult<TrainingRunRecord> {
        let run_id = RunId::new();
        let mut recorder = RunRecorder::new(run_id.clone(), self.config.training.min_f1);
        self.progress.on_event(ProgressEvent::RunStarted { run_id: run_id.clone() });

        match self.execute(&run_id, &mut recorder).await {
            Ok(status) => {
                let record = recorder.finish(status);
                // The bundle is already stored (and maybe serving), so a lost
                // history entry must not turn the run into a failure.
                if let Err(e) = self.history.append(&record) {
                    error!(run_id = %run_id, error = %e, "failed to record finished run");
                }
                self.progress.on_event(ProgressEvent::RunFinished { run_id, status });
                Ok(record)
            }
            Err((stage, source)) => {
                error!(run_id = %run_id, stage = %stage, error = %source, "training run failed");
                let record = recorder.fail(stage, &source);
                if let Err(e) = self.history.append(&record) {
                    warn!(run_id = %run_id, error = %e, "failed to record failed run");
                }
                self.progress.on_event(ProgressEvent::RunFinished { run_id: run_id.clone(), status: RunStatus::Failed });
                Err(PipelineError::StageFailed { run_id: run_id.to_string(), stage, source: Box::new(source) })
            }
        }
    }

    async fn execute(&self, run_id: &RunId, recorder: &mut RunRecorder) -> StageResult<RunStatus> {
        let config = &self.config;

        let started = self.begin(run_id, Stage::Ingestion);
        let collection = config.source.collection_ref();
        recorder.record_source(collection.to_string());
        let table = at(Stage::Ingestion, self.client.fetch_all(&collection).await)?;
        self.end(run_id, Stage::Ingestion, started);

        let started = self.begin(run_id, Stage::Validation);
        let validator = DataValidator::new(config.schema.clone(), config.validation.max_null_ratio);
        let (accepted, report) = validator.validate(&table);
        recorder.record_validation(report.clone());
        if !report.accepted {
            return Err((
                Stage::Validation,
                PipelineError::ValidationFailed { summary: report.summary(), report: Box::new(report) },
            ));
        }
        self.end(run_id, Stage::Validation, started);

        let started = self.begin(run_id, Stage::Transformation);
        let transformer = DataTransformer::new(config.schema.clone(), config.transform.categorical_encoding);
        let (features, labels, transform) = at(Stage::Transformation, transformer.fit_transform(&accepted))?;
        self.end(run_id, Stage::Transformation, started);

        let started = self.begin(run_id, Stage::Training);
        let trainer = ModelTrainer::new(config.training.clone());
        let outcome = at(Stage::Training, trainer.train(features, labels, transform.feature_names()).await)?;
        recorder.record_training(&outcome);
        self.end(run_id, Stage::Training, started);

        let started = self.begin(run_id, Stage::Persistence);
        let evaluation = BundleEvaluation { metrics: outcome.eval_metrics, min_f1: config.training.min_f1 };
        let bundle = ArtifactBundle::new(transform, outcome.estimator, evaluation);
        at(Stage::Persistence, self.store.save(run_id, &bundle))?;
        self.end(run_id, Stage::Persistence, started);

        if !evaluation.passed() {
            warn!(
                run_id = %run_id,
                f1 = evaluation.metrics.f1,
                threshold = evaluation.min_f1,
                "evaluation f1 below threshold, bundle will not be promoted"
            );
            return Ok(RunStatus::BelowThreshold);
        }

        if config.auto_promote {
            let started = self.begin(run_id, Stage::Promotion);
            at(Stage::Promotion, self.store.promote(run_id))?;
            recorder.record_promoted();
            self.end(run_id, Stage::Promotion, started);
        }
        Ok(RunStatus::Succeeded)
    }

    fn begin(&self, run_id: &RunId, stage: Stage) -> Instant {
        self.progress.on_event(ProgressEvent::StageStarted { run_id: run_id.clone(), stage });
        Instant::now()
    }

    fn end(&self, run_id: &RunId, stage: Stage, started: Instant) {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.progress.on_event(ProgressEvent::StageFinished { run_id: run_id.clone(), stage, elapsed_ms });
    }

    /// Predict every row of `table` with the final bundle.
    pub fn predict(&self, table: &Table) -> PipelineResult<PredictionOutcome> {
        let predictions = self.prediction.predict(table)?;
        let outcome = PredictionOutcome::new(table.clone(), predictions)?;
        info!(
            total = outcome.summary.total,
            safe = outcome.summary.safe,
            not_safe = outcome.summary.not_safe,
            "prediction complete"
        );
        Ok(outcome)
    }

    pub fn promote(&self, run_id: &RunId) -> PipelineResult<u64> {
        self.store.promote(run_id)
    }

    /// Recorded runs, oldest first.
    pub fn runs(&self) -> PipelineResult<Vec<TrainingRunRecord>> {
        self.history.list()
    }

    pub fn run(&self, run_id: &RunId) -> PipelineResult<TrainingRunRecord> {
        self.history.get(run_id)
    }
}
