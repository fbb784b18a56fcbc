//! Pluggable classification estimators.
//!
//! The trainer only sees [`Estimator`]. Concrete algorithms are chosen by an
//! [`EstimatorSpec`] at training time and restored from artifacts through the
//! [`EstimatorRegistry`], keyed by their algorithm tag.

mod logistic;
mod tree;

pub use logistic::LogisticRegression;
pub use tree::{DecisionTree, RandomForest};

use crate::error::{PipelineError, PipelineResult};
use crate::transform::{FeatureMatrix, TargetVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub trait Estimator: Send + Sync + std::fmt::Debug {
    /// Stable algorithm tag written into artifacts.
    fn algorithm(&self) -> &'static str;

    fn fit(&mut self, features: &FeatureMatrix, labels: &TargetVector) -> PipelineResult<()>;

    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<TargetVector>;

    fn payload_version(&self) -> u16 {
        1
    }

    /// Serialize the fitted state.
    fn encode(&self) -> PipelineResult<Vec<u8>>;
}

pub(crate) fn check_fit_shapes(features: &FeatureMatrix, labels: &TargetVector) -> PipelineResult<()> {
    if features.nrows() != labels.len() {
        return Err(PipelineError::Estimator(format!(
            "feature rows ({}) do not match label count ({})",
            features.nrows(),
            labels.len()
        )));
    }
    if features.nrows() == 0 {
        return Err(PipelineError::Estimator("cannot fit on zero rows".to_string()));
    }
    Ok(())
}

pub(crate) fn check_width(expected: usize, features: &FeatureMatrix) -> PipelineResult<()> {
    if features.ncols() != expected {
        return Err(PipelineError::Estimator(format!(
            "estimator was fit on {expected} features, got {}",
            features.ncols()
        )));
    }
    Ok(())
}

pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(
    algorithm: &str,
    version: u16,
    payload: &[u8],
) -> PipelineResult<T> {
    if version != 1 {
        return Err(PipelineError::Estimator(format!("unsupported {algorithm} payload version {version}")));
    }
    serde_json::from_slice(payload).map_err(|e| PipelineError::Estimator(format!("{algorithm} payload: {e}")))
}

/// Configured candidate algorithm and its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum EstimatorSpec {
    LogisticRegression {
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    DecisionTree {
        #[serde(default = "default_max_depth")]
        max_depth: usize,
        #[serde(default = "default_min_samples_split")]
        min_samples_split: usize,
    },
    RandomForest {
        #[serde(default = "default_n_trees")]
        n_trees: usize,
        #[serde(default = "default_max_depth")]
        max_depth: usize,
        #[serde(default = "default_min_samples_split")]
        min_samples_split: usize,
        #[serde(default = "default_forest_seed")]
        seed: u64,
    },
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_max_iter() -> usize {
    1000
}

fn default_alpha() -> f64 {
    1e-4
}

fn default_max_depth() -> usize {
    8
}

fn default_min_samples_split() -> usize {
    2
}

fn default_n_trees() -> usize {
    32
}

fn default_forest_seed() -> u64 {
    42
}

impl EstimatorSpec {
    #[must_use]
    pub fn logistic_regression() -> Self {
        Self::LogisticRegression {
            learning_rate: default_learning_rate(),
            max_iter: default_max_iter(),
            alpha: default_alpha(),
        }
    }

    #[must_use]
    pub fn decision_tree() -> Self {
        Self::DecisionTree { max_depth: default_max_depth(), min_samples_split: default_min_samples_split() }
    }

    #[must_use]
    pub fn random_forest() -> Self {
        Self::RandomForest {
            n_trees: default_n_trees(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            seed: default_forest_seed(),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::LogisticRegression { .. } => LogisticRegression::ALGORITHM,
            Self::DecisionTree { .. } => DecisionTree::ALGORITHM,
            Self::RandomForest { .. } => RandomForest::ALGORITHM,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |msg: &str| Err(PipelineError::InvalidConfig(format!("{}: {msg}", self.algorithm())));
        match *self {
            Self::LogisticRegression { learning_rate, max_iter, alpha } => {
                if !learning_rate.is_finite() || learning_rate <= 0.0 {
                    return invalid("learning_rate must be > 0");
                }
                if max_iter == 0 {
                    return invalid("max_iter must be >= 1");
                }
                if !alpha.is_finite() || alpha < 0.0 {
                    return invalid("alpha must be >= 0");
                }
            }
            Self::DecisionTree { max_depth, min_samples_split } => {
                if max_depth == 0 || min_samples_split < 2 {
                    return invalid("max_depth must be >= 1 and min_samples_split >= 2");
                }
            }
            Self::RandomForest { n_trees, max_depth, min_samples_split, .. } => {
                if n_trees == 0 {
                    return invalid("n_trees must be >= 1");
                }
                if max_depth == 0 || min_samples_split < 2 {
                    return invalid("max_depth must be >= 1 and min_samples_split >= 2");
                }
            }
        }
        Ok(())
    }

    /// A fresh, unfitted estimator.
    #[must_use]
    pub fn build(&self) -> Box<dyn Estimator> {
        match *self {
            Self::LogisticRegression { learning_rate, max_iter, alpha } => {
                Box::new(LogisticRegression::new(learning_rate, max_iter, alpha))
            }
            Self::DecisionTree { max_depth, min_samples_split } => {
                Box::new(DecisionTree::new(max_depth, min_samples_split))
            }
            Self::RandomForest { n_trees, max_depth, min_samples_split, seed } => {
                Box::new(RandomForest::new(n_trees, max_depth, min_samples_split, seed))
            }
        }
    }
}

pub type EstimatorDecoder = fn(u16, &[u8]) -> PipelineResult<Box<dyn Estimator>>;

/// Restores fitted estimators from artifact payloads by algorithm tag.
#[derive(Debug, Clone)]
pub struct EstimatorRegistry {
    decoders: HashMap<String, EstimatorDecoder>,
}

fn decode_logistic(version: u16, payload: &[u8]) -> PipelineResult<Box<dyn Estimator>> {
    Ok(Box::new(LogisticRegression::decode(version, payload)?))
}

fn decode_decision_tree(version: u16, payload: &[u8]) -> PipelineResult<Box<dyn Estimator>> {
    Ok(Box::new(DecisionTree::decode(version, payload)?))
}

fn decode_random_forest(version: u16, payload: &[u8]) -> PipelineResult<Box<dyn Estimator>> {
    Ok(Box::new(RandomForest::decode(version, payload)?))
}

impl Default for EstimatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(LogisticRegression::ALGORITHM, decode_logistic);
        registry.register(DecisionTree::ALGORITHM, decode_decision_tree);
        registry.register(RandomForest::ALGORITHM, decode_random_forest);
        registry
    }
}

impl EstimatorRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self { decoders: HashMap::new() }
    }

    pub fn register(&mut self, algorithm: &str, decoder: EstimatorDecoder) {
        self.decoders.insert(algorithm.to_string(), decoder);
    }

    pub fn decode(&self, algorithm: &str, version: u16, payload: &[u8]) -> PipelineResult<Box<dyn Estimator>> {
        let decoder = self
            .decoders
            .get(algorithm)
            .ok_or_else(|| PipelineError::Estimator(format!("no decoder registered for `{algorithm}`")))?;
        decoder(version, payload)
    }
}
