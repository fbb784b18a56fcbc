//! Model fitting, selection and evaluation.

use crate::config::TrainingConfig;
use crate::drift::{DriftReport, detect_drift};
use crate::error::{PipelineError, PipelineResult};
use crate::estimator::{Estimator, EstimatorSpec};
use crate::metrics::EvaluationMetrics;
use crate::transform::{FeatureMatrix, TargetVector};
use ndarray::Axis;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Row indices of a train/evaluation partition, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
}

/// Partition rows per label so both splits keep the class proportions.
///
/// Each class contributes `round(n * ratio)` rows to the evaluation split,
/// clamped so a class with at least two rows lands in both splits.
pub fn stratified_split(labels: &TargetVector, ratio: f64, seed: u64) -> PipelineResult<SplitIndices> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(PipelineError::InvalidConfig(format!("eval_split_ratio must be in (0, 1), got {ratio}")));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut eval = Vec::new();

    for class in [0u8, 1u8] {
        let mut rows: Vec<usize> = labels.iter().enumerate().filter(|(_, l)| **l == class).map(|(i, _)| i).collect();
        rows.shuffle(&mut rng);
        let n = rows.len();
        let mut n_eval = (n as f64 * ratio).round() as usize;
        if n >= 2 {
            n_eval = n_eval.clamp(1, n - 1);
        }
        eval.extend_from_slice(&rows[..n_eval]);
        train.extend_from_slice(&rows[n_eval..]);
    }

    if train.is_empty() || eval.is_empty() {
        return Err(PipelineError::Estimator(format!(
            "cannot split {} rows into non-empty train and evaluation sets",
            labels.len()
        )));
    }
    train.sort_unstable();
    eval.sort_unstable();
    Ok(SplitIndices { train, eval })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub spec: EstimatorSpec,
    pub train: EvaluationMetrics,
    pub eval: EvaluationMetrics,
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub estimator: Box<dyn Estimator>,
    pub train_metrics: EvaluationMetrics,
    pub eval_metrics: EvaluationMetrics,
    pub candidates: Vec<CandidateScore>,
    pub drift: DriftReport,
    pub overfit: bool,
    pub train_rows: usize,
    pub eval_rows: usize,
}

impl TrainingOutcome {
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        self.estimator.algorithm()
    }
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Fit every candidate on a blocking worker thread.
    pub async fn train(
        &self,
        features: FeatureMatrix,
        labels: TargetVector,
        feature_names: Vec<String>,
    ) -> PipelineResult<TrainingOutcome> {
        let trainer = self.clone();
        tokio::task::spawn_blocking(move || trainer.train_blocking(&features, &labels, &feature_names))
            .await
            .map_err(|e| PipelineError::Estimator(format!("training task failed: {e}")))?
    }

    pub fn train_blocking(
        &self,
        features: &FeatureMatrix,
        labels: &TargetVector,
        feature_names: &[String],
    ) -> PipelineResult<TrainingOutcome> {
        if features.nrows() != labels.len() {
            return Err(PipelineError::Estimator(format!(
                "feature rows ({}) do not match label count ({})",
                features.nrows(),
                labels.len()
            )));
        }
        if self.config.candidates.is_empty() {
            return Err(PipelineError::InvalidConfig("at least one estimator candidate is required".to_string()));
        }

        let split = stratified_split(labels, self.config.eval_split_ratio, self.config.seed)?;
        let x_train = features.select(Axis(0), &split.train);
        let y_train = labels.select(Axis(0), &split.train);
        let x_eval = features.select(Axis(0), &split.eval);
        let y_eval = labels.select(Axis(0), &split.eval);
        debug!(train_rows = split.train.len(), eval_rows = split.eval.len(), "stratified split");

        let mut best: Option<(Box<dyn Estimator>, usize)> = None;
        let mut candidates: Vec<CandidateScore> = Vec::with_capacity(self.config.candidates.len());
        for spec in &self.config.candidates {
            let mut estimator = spec.build();
            estimator.fit(&x_train, &y_train)?;
            let train = EvaluationMetrics::compute(&y_train, &estimator.predict(&x_train)?);
            let eval = EvaluationMetrics::compute(&y_eval, &estimator.predict(&x_eval)?);
            info!(algorithm = spec.algorithm(), train_f1 = train.f1, eval_f1 = eval.f1, "candidate evaluated");

            let improves = best.as_ref().is_none_or(|(_, idx)| eval.f1 > candidates[*idx].eval.f1);
            candidates.push(CandidateScore { spec: spec.clone(), train, eval });
            if improves {
                best = Some((estimator, candidates.len() - 1));
            }
        }

        let (estimator, best_idx) = best.ok_or_else(|| PipelineError::Estimator("no candidate was fit".to_string()))?;
        let chosen = &candidates[best_idx];
        let (train_metrics, eval_metrics) = (chosen.train, chosen.eval);

        let overfit = train_metrics.f1 - eval_metrics.f1 > self.config.overfit_tolerance;
        if overfit {
            warn!(
                algorithm = estimator.algorithm(),
                train_f1 = train_metrics.f1,
                eval_f1 = eval_metrics.f1,
                tolerance = self.config.overfit_tolerance,
                "train/eval f1 gap exceeds tolerance"
            );
        }

        let drift = detect_drift(feature_names, &x_train, &x_eval, self.config.drift_p_value);
        let drifted = drift.drifted();
        if !drifted.is_empty() {
            warn!(features = ?drifted, "distribution drift between train and eval splits");
        }

        info!(algorithm = estimator.algorithm(), eval_f1 = eval_metrics.f1, "selected estimator");
        Ok(TrainingOutcome {
            estimator,
            train_metrics,
            eval_metrics,
            candidates,
            drift,
            overfit,
            train_rows: split.train.len(),
            eval_rows: split.eval.len(),
        })
    }
}
