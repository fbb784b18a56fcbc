//! Serving predictions from the final bundle.
//!
//! The final bundle is loaded lazily into a [`BundleCache`] and shared as an
//! `Arc` snapshot, so a single call never mixes the transform of one bundle
//! with the estimator of another. Promotion invalidates the cache through
//! [`PromotionHook`].

use crate::artifacts::{ArtifactBundle, ArtifactStore, PromotionHook};
use crate::error::{PipelineError, PipelineResult};
use crate::history::RunId;
use crate::schema::Label;
use crate::table::{Table, Value};
use crate::transform::TargetVector;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

pub const PREDICTION_COLUMN: &str = "prediction";
pub const STATUS_COLUMN: &str = "network_status";

fn poisoned<T>(e: std::sync::PoisonError<T>) -> PipelineError {
    PipelineError::LockPoisoned(e.to_string())
}

/// Read-mostly holder of the loaded final bundle.
#[derive(Debug, Default)]
pub struct BundleCache {
    slot: RwLock<Option<Arc<ArtifactBundle>>>,
    /// Bumped on every invalidation.
    generation: AtomicU64,
}

impl BundleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineResult<Option<Arc<ArtifactBundle>>> {
        Ok(self.slot.read().map_err(poisoned)?.clone())
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) -> PipelineResult<()> {
        let mut slot = self.slot.write().map_err(poisoned)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
        Ok(())
    }

    /// Cache `bundle` unless the cache was invalidated after `observed` was read.
    ///
    /// The bundle is returned either way so the caller can finish its call.
    pub fn install(&self, observed: u64, bundle: ArtifactBundle) -> PipelineResult<Arc<ArtifactBundle>> {
        let bundle = Arc::new(bundle);
        let mut slot = self.slot.write().map_err(poisoned)?;
        if self.generation.load(Ordering::Acquire) == observed {
            *slot = Some(Arc::clone(&bundle));
        } else {
            debug!(observed, current = self.generation(), "discarding bundle loaded before a promotion");
        }
        Ok(bundle)
    }
}

impl PromotionHook for BundleCache {
    fn on_promoted(&self, run_id: &RunId, generation: u64) {
        match self.invalidate() {
            Ok(()) => debug!(run_id = %run_id, generation, "bundle cache invalidated"),
            Err(e) => tracing::error!(error = %e, "failed to invalidate bundle cache"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total: usize,
    pub safe: usize,
    pub not_safe: usize,
}

impl PredictionSummary {
    #[must_use]
    pub fn from_predictions(predictions: &TargetVector) -> Self {
        let not_safe = predictions.iter().filter(|&&p| p == 1).count();
        Self { total: predictions.len(), safe: predictions.len() - not_safe, not_safe }
    }
}

/// Predictions attached to the input rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    /// Input table with `prediction` and `network_status` appended.
    pub table: Table,
    pub predictions: TargetVector,
    pub summary: PredictionSummary,
}

impl PredictionOutcome {
    pub fn new(table: Table, predictions: TargetVector) -> PipelineResult<Self> {
        let codes = predictions.iter().map(|&p| Value::Number(f64::from(p))).collect();
        let statuses = predictions.iter().map(|&p| Value::from(Label::from_code(p).as_str())).collect();
        let table = table.with_column(PREDICTION_COLUMN, codes)?.with_column(STATUS_COLUMN, statuses)?;
        let summary = PredictionSummary::from_predictions(&predictions);
        Ok(Self { table, predictions, summary })
    }
}

pub struct PredictionService {
    store: Arc<ArtifactStore>,
    cache: Arc<BundleCache>,
    load_lock: Mutex<()>,
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService").field("store", &self.store).finish_non_exhaustive()
    }
}

impl PredictionService {
    /// Create a service whose cache is invalidated by `store` promotions.
    pub fn new(store: Arc<ArtifactStore>) -> PipelineResult<Self> {
        let cache = Arc::new(BundleCache::new());
        store.add_promotion_hook(&cache)?;
        Ok(Self { store, cache, load_lock: Mutex::new(()) })
    }

    /// The current final bundle, loading it on first use.
    pub fn bundle(&self) -> PipelineResult<Arc<ArtifactBundle>> {
        if let Some(bundle) = self.cache.get()? {
            return Ok(bundle);
        }
        let _loading = self.load_lock.lock().map_err(poisoned)?;
        if let Some(bundle) = self.cache.get()? {
            return Ok(bundle);
        }

        let observed = self.cache.generation();
        let bundle = self.store.load_final().map_err(|e| match e {
            PipelineError::ArtifactNotFound { .. } => PipelineError::ModelNotReady,
            other => other,
        })?;
        info!(algorithm = bundle.estimator.algorithm(), "loaded final bundle");
        self.cache.install(observed, bundle)
    }

    /// Label every row of `table`. An empty table never touches artifacts.
    pub fn predict(&self, table: &Table) -> PipelineResult<TargetVector> {
        if table.is_empty() {
            return Ok(TargetVector::from(Vec::new()));
        }
        let bundle = self.bundle()?;
        let predictions = bundle.predict(table)?;
        debug!(rows = table.len(), "predicted batch");
        Ok(predictions)
    }
}
