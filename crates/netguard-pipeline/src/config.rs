//! Pipeline configuration, loaded from TOML.
//!
//! Every section is optional; an empty file yields the defaults below.
//!
//! ```toml
//! auto_promote = true
//!
//! [source]
//! database = "NetworkSecurity"
//! collection = "NetworkData"
//! timeout_secs = 30
//!
//! [source.backend]
//! kind = "jsonl"
//! root = "data"
//! # or: kind = "mongo", uri = "mongodb://localhost:27017"
//!
//! [training]
//! eval_split_ratio = 0.2
//! min_f1 = 0.6
//!
//! [[training.candidates]]
//! algorithm = "logistic_regression"
//! ```

use crate::error::{PipelineError, PipelineResult};
use crate::estimator::EstimatorSpec;
use crate::schema::ExpectedSchema;
use crate::store::{CollectionRef, HttpRecordStore, JsonlRecordStore, MongoRecordStore, RecordStore};
use crate::transform::CategoricalEncoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DATABASE: &str = "NetworkSecurity";
pub const DEFAULT_COLLECTION: &str = "NetworkData";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceBackend {
    /// `<root>/<database>/<collection>.jsonl`
    Jsonl { root: PathBuf },
    Http { base_url: String },
    /// A MongoDB deployment; `database`/`collection` name the collection.
    Mongo { uri: String },
}

impl Default for SourceBackend {
    fn default() -> Self {
        Self::Jsonl { root: PathBuf::from("data") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub database: String,
    pub collection: String,
    pub timeout_secs: u64,
    pub backend: SourceBackend,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            timeout_secs: 30,
            backend: SourceBackend::default(),
        }
    }
}

impl SourceConfig {
    #[must_use]
    pub fn collection_ref(&self) -> CollectionRef {
        CollectionRef::new(self.database.clone(), self.collection.clone())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn build_store(&self) -> PipelineResult<Arc<dyn RecordStore>> {
        Ok(match &self.backend {
            SourceBackend::Jsonl { root } => Arc::new(JsonlRecordStore::new(root.clone())),
            SourceBackend::Http { base_url } => Arc::new(HttpRecordStore::new(base_url.clone(), self.timeout())?),
            SourceBackend::Mongo { uri } => Arc::new(MongoRecordStore::new(uri.clone())?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_null_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { max_null_ratio: 0.1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub categorical_encoding: CategoricalEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub eval_split_ratio: f64,
    pub seed: u64,
    pub min_f1: f64,
    /// Largest tolerated train F1 minus eval F1.
    pub overfit_tolerance: f64,
    pub drift_p_value: f64,
    pub candidates: Vec<EstimatorSpec>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            eval_split_ratio: 0.2,
            seed: 42,
            min_f1: 0.6,
            overfit_tolerance: 0.05,
            drift_p_value: 0.05,
            candidates: vec![
                EstimatorSpec::logistic_regression(),
                EstimatorSpec::decision_tree(),
                EstimatorSpec::random_forest(),
            ],
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        let unit = |name: &str, value: f64, inclusive: bool| {
            let ok = if inclusive { (0.0..=1.0).contains(&value) } else { value > 0.0 && value < 1.0 };
            if ok {
                Ok(())
            } else {
                Err(PipelineError::InvalidConfig(format!("training.{name} out of range: {value}")))
            }
        };
        unit("eval_split_ratio", self.eval_split_ratio, false)?;
        unit("min_f1", self.min_f1, true)?;
        unit("overfit_tolerance", self.overfit_tolerance, true)?;
        unit("drift_p_value", self.drift_p_value, false)?;
        if self.candidates.is_empty() {
            return Err(PipelineError::InvalidConfig("training.candidates must not be empty".to_string()));
        }
        for candidate in &self.candidates {
            candidate.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self { root: PathBuf::from("artifacts") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub schema: ExpectedSchema,
    pub validation: ValidationConfig,
    pub transform: TransformConfig,
    pub training: TrainingConfig,
    pub artifacts: ArtifactsConfig,
    /// Promote a run's bundle as soon as it passes the F1 bar.
    pub auto_promote: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            schema: ExpectedSchema::default(),
            validation: ValidationConfig::default(),
            transform: TransformConfig::default(),
            training: TrainingConfig::default(),
            artifacts: ArtifactsConfig::default(),
            auto_promote: true,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            PipelineError::InvalidConfig(msg) => PipelineError::InvalidConfig(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.source.database.trim().is_empty() || self.source.collection.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("source.database and source.collection are required".to_string()));
        }
        if self.source.timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig("source.timeout_secs must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.validation.max_null_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "validation.max_null_ratio must be in [0, 1], got {}",
                self.validation.max_null_ratio
            )));
        }
        self.schema.validate()?;
        self.training.validate()?;
        Ok(())
    }
}
