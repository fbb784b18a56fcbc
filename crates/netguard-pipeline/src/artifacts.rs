//! Versioned artifact bundles and promotion to the final serving slot.

use crate::envelope::{Envelope, PREPROCESSOR_TAG, estimator_tag};
use crate::error::{PipelineError, PipelineResult};
use crate::estimator::{Estimator, EstimatorRegistry};
use crate::history::RunId;
use crate::layout::{ArtifactLayout, MANIFEST_FILE, MODEL_FILE, PREPROCESSOR_FILE, write_atomic};
use crate::metrics::EvaluationMetrics;
use crate::table::Table;
use crate::transform::{PreprocessingTransform, TargetVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Evaluation result a bundle was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BundleEvaluation {
    pub metrics: EvaluationMetrics,
    pub min_f1: f64,
}

impl BundleEvaluation {
    /// Whether the bundle may be promoted.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.metrics.f1 >= self.min_f1
    }
}

/// A fitted transform and estimator, always read and written together.
#[derive(Debug)]
pub struct ArtifactBundle {
    pub transform: PreprocessingTransform,
    pub estimator: Box<dyn Estimator>,
    pub evaluation: BundleEvaluation,
}

impl ArtifactBundle {
    #[must_use]
    pub fn new(transform: PreprocessingTransform, estimator: Box<dyn Estimator>, evaluation: BundleEvaluation) -> Self {
        Self { transform, estimator, evaluation }
    }

    pub fn predict(&self, table: &Table) -> PipelineResult<TargetVector> {
        let features = self.transform.transform(table)?;
        self.estimator.predict(&features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format_version: u32,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
    pub evaluation: BundleEvaluation,
    pub preprocessor_sha256: String,
    pub model_sha256: String,
}

impl BundleManifest {
    #[must_use]
    pub fn promotable(&self) -> bool {
        self.evaluation.passed()
    }
}

/// Notified after a bundle becomes the final serving bundle.
///
/// The store holds hooks weakly: a hook stops firing once its last `Arc`
/// is dropped, and dead entries are pruned on the next registration or
/// promotion.
pub trait PromotionHook: Send + Sync {
    fn on_promoted(&self, run_id: &RunId, generation: u64);
}

pub struct ArtifactStore {
    layout: ArtifactLayout,
    registry: EstimatorRegistry,
    /// Serializes promotion against final-slot reads.
    final_lock: RwLock<()>,
    hooks: RwLock<Vec<Weak<dyn PromotionHook>>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore").field("root", &self.layout.root()).finish_non_exhaustive()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> PipelineError {
    PipelineError::LockPoisoned(e.to_string())
}

impl ArtifactStore {
    #[must_use]
    pub fn new(layout: ArtifactLayout) -> Self {
        Self::with_registry(layout, EstimatorRegistry::default())
    }

    #[must_use]
    pub fn with_registry(layout: ArtifactLayout, registry: EstimatorRegistry) -> Self {
        Self { layout, registry, final_lock: RwLock::new(()), hooks: RwLock::new(Vec::new()) }
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn add_promotion_hook<H: PromotionHook + 'static>(&self, hook: &Arc<H>) -> PipelineResult<()> {
        let hook = Arc::downgrade(hook) as Weak<dyn PromotionHook>;
        let mut hooks = self.hooks.write().map_err(poisoned)?;
        hooks.retain(|h| h.strong_count() > 0);
        hooks.push(hook);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn hook_count(&self) -> PipelineResult<usize> {
        Ok(self.hooks.read().map_err(poisoned)?.len())
    }

    /// Write a run's bundle. Run directories are never overwritten.
    pub fn save(&self, run_id: &RunId, bundle: &ArtifactBundle) -> PipelineResult<BundleManifest> {
        let run_dir = self.layout.run_dir(run_id);
        if run_dir.exists() {
            return Err(PipelineError::ArtifactConflict { run_id: run_id.to_string() });
        }

        let preprocessor =
            Envelope::new(PREPROCESSOR_TAG, PreprocessingTransform::PAYLOAD_VERSION, bundle.transform.encode()?);
        let algorithm = bundle.estimator.algorithm();
        let model = Envelope::new(estimator_tag(algorithm), bundle.estimator.payload_version(), bundle.estimator.encode()?);

        let manifest = BundleManifest {
            format_version: BUNDLE_FORMAT_VERSION,
            run_id: run_id.clone(),
            created_at: Utc::now(),
            algorithm: algorithm.to_string(),
            evaluation: bundle.evaluation,
            preprocessor_sha256: preprocessor.sha256(),
            model_sha256: model.sha256(),
        };

        let staging = self.layout.staging_dir(run_id);
        std::fs::create_dir_all(&staging)?;
        let written = write_bundle_files(&staging, &preprocessor, &model, &manifest).and_then(|()| {
            std::fs::create_dir_all(self.layout.runs_dir())?;
            if run_dir.exists() {
                return Err(PipelineError::ArtifactConflict { run_id: run_id.to_string() });
            }
            std::fs::rename(&staging, &run_dir)?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        info!(run_id = %run_id, algorithm, dir = %run_dir.display(), "saved artifact bundle");
        Ok(manifest)
    }

    pub fn load(&self, run_id: &RunId) -> PipelineResult<ArtifactBundle> {
        self.read_bundle(&self.layout.run_dir(run_id), &format!("runs/{run_id}"))
    }

    pub fn manifest(&self, run_id: &RunId) -> PipelineResult<BundleManifest> {
        read_manifest(&self.layout.run_dir(run_id), &format!("runs/{run_id}"))
    }

    /// Make `run_id`'s bundle the final serving bundle.
    ///
    /// Returns the new generation number.
    pub fn promote(&self, run_id: &RunId) -> PipelineResult<u64> {
        let manifest = self.manifest(run_id)?;
        if !manifest.promotable() {
            return Err(PipelineError::TrainingBelowThreshold {
                run_id: run_id.to_string(),
                f1: manifest.evaluation.metrics.f1,
                threshold: manifest.evaluation.min_f1,
            });
        }
        // Refuse to promote anything that would not load.
        self.load(run_id)?;

        let generation = {
            let _guard = self.final_lock.write().map_err(poisoned)?;
            let generation = self.read_current()?.map_or(1, |g| g + 1);
            let target = self.layout.generation_dir(generation);
            let staging = self.layout.staging_dir(run_id);
            let copied = copy_bundle(&self.layout.run_dir(run_id), &staging).and_then(|()| {
                std::fs::create_dir_all(self.layout.final_dir())?;
                if target.exists() {
                    std::fs::remove_dir_all(&target)?;
                }
                std::fs::rename(&staging, &target)?;
                Ok(())
            });
            if let Err(e) = copied {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e);
            }
            write_atomic(&self.layout.current_pointer(), generation.to_string().as_bytes())?;
            self.prune_generations(generation);
            generation
        };

        info!(run_id = %run_id, generation, "promoted bundle to final");
        let hooks: Vec<Arc<dyn PromotionHook>> = {
            let mut registered = self.hooks.write().map_err(poisoned)?;
            registered.retain(|h| h.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for hook in hooks {
            hook.on_promoted(run_id, generation);
        }
        Ok(generation)
    }

    pub fn load_final(&self) -> PipelineResult<ArtifactBundle> {
        let _guard = self.final_lock.read().map_err(poisoned)?;
        let generation = self.read_current()?.ok_or_else(|| PipelineError::ArtifactNotFound { slot: "final".to_string() })?;
        self.read_bundle(&self.layout.generation_dir(generation), "final")
    }

    /// Manifest of the final serving bundle, if any.
    pub fn final_manifest(&self) -> PipelineResult<Option<BundleManifest>> {
        let _guard = self.final_lock.read().map_err(poisoned)?;
        match self.read_current()? {
            Some(generation) => Ok(Some(read_manifest(&self.layout.generation_dir(generation), "final")?)),
            None => Ok(None),
        }
    }

    pub fn current_generation(&self) -> PipelineResult<Option<u64>> {
        let _guard = self.final_lock.read().map_err(poisoned)?;
        self.read_current()
    }

    fn read_current(&self) -> PipelineResult<Option<u64>> {
        let path = self.layout.current_pointer();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        text.trim().parse::<u64>().map(Some).map_err(|e| PipelineError::corrupt(path, e))
    }

    /// Keep the current and the previous generation.
    fn prune_generations(&self, current: u64) {
        let Ok(dir) = std::fs::read_dir(self.layout.final_dir()) else {
            return;
        };
        for entry in dir.flatten() {
            let path = entry.path();
            let Some(generation) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            if generation + 1 < current && path.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(generation, error = %e, "failed to prune final generation");
                } else {
                    debug!(generation, "pruned final generation");
                }
            }
        }
    }

    fn read_bundle(&self, dir: &Path, slot: &str) -> PipelineResult<ArtifactBundle> {
        let manifest = read_manifest(dir, slot)?;

        let preprocessor_path = dir.join(PREPROCESSOR_FILE);
        let preprocessor = read_envelope(&preprocessor_path, PREPROCESSOR_TAG, &manifest.preprocessor_sha256)?;
        let transform = PreprocessingTransform::decode(preprocessor.payload_version, &preprocessor.payload)
            .map_err(|e| PipelineError::corrupt(&preprocessor_path, e))?;

        let model_path = dir.join(MODEL_FILE);
        let model = read_envelope(&model_path, &estimator_tag(&manifest.algorithm), &manifest.model_sha256)?;
        let estimator = self
            .registry
            .decode(&manifest.algorithm, model.payload_version, &model.payload)
            .map_err(|e| PipelineError::corrupt(&model_path, e))?;

        debug!(run_id = %manifest.run_id, slot, algorithm = %manifest.algorithm, "loaded artifact bundle");
        Ok(ArtifactBundle { transform, estimator, evaluation: manifest.evaluation })
    }
}

fn read_manifest(dir: &Path, slot: &str) -> PipelineResult<BundleManifest> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::ArtifactNotFound { slot: slot.to_string() });
        }
        Err(e) => return Err(e.into()),
    };
    let manifest: BundleManifest = serde_json::from_slice(&bytes).map_err(|e| PipelineError::corrupt(&path, e))?;
    if manifest.format_version != BUNDLE_FORMAT_VERSION {
        return Err(PipelineError::corrupt(
            path,
            format!("unsupported bundle format version {}", manifest.format_version),
        ));
    }
    Ok(manifest)
}

fn read_envelope(path: &Path, tag: &str, expected_sha256: &str) -> PipelineResult<Envelope> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::corrupt(path, e))?;
    let envelope = Envelope::decode_tagged(&bytes, tag).map_err(|e| PipelineError::corrupt(path, e))?;
    if envelope.sha256() != expected_sha256 {
        return Err(PipelineError::corrupt(path, "checksum does not match bundle manifest"));
    }
    Ok(envelope)
}

fn write_bundle_files(
    dir: &Path,
    preprocessor: &Envelope,
    model: &Envelope,
    manifest: &BundleManifest,
) -> PipelineResult<()> {
    let encode = |e: &Envelope| e.encode().map_err(|err| PipelineError::corrupt(dir, err));
    std::fs::write(dir.join(PREPROCESSOR_FILE), encode(preprocessor)?)?;
    std::fs::write(dir.join(MODEL_FILE), encode(model)?)?;
    std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(manifest)?)?;
    Ok(())
}

fn copy_bundle(from: &Path, to: &Path) -> PipelineResult<()> {
    std::fs::create_dir_all(to)?;
    for file in [PREPROCESSOR_FILE, MODEL_FILE, MANIFEST_FILE] {
        std::fs::copy(from.join(file), to.join(file))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatorSpec;
    use crate::schema::{ColumnSpec, ExpectedSchema, TargetSpec};
    use crate::table::Value;
    use crate::transform::{CategoricalEncoding, DataTransformer};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    fn table() -> Table {
        let rows = (0..12)
            .map(|i| {
                let label = if i % 2 == 0 { -1.0 } else { 1.0 };
                vec![Value::Number(label * (1.0 + f64::from(i) * 0.01)), Value::Number(label)]
            })
            .collect();
        Table::from_rows(vec!["x".to_string(), "Result".to_string()], rows).unwrap()
    }

    fn bundle(f1: f64, min_f1: f64) -> ArtifactBundle {
        let schema = ExpectedSchema::new(vec![ColumnSpec::numeric("x")], TargetSpec::default());
        let (x, y, transform) =
            DataTransformer::new(schema, CategoricalEncoding::OneHot).fit_transform(&table()).unwrap();
        let mut estimator = EstimatorSpec::decision_tree().build();
        estimator.fit(&x, &y).unwrap();
        let metrics = EvaluationMetrics { f1, ..EvaluationMetrics::default() };
        ArtifactBundle::new(transform, estimator, BundleEvaluation { metrics, min_f1 })
    }

    fn store(temp: &TempDir) -> ArtifactStore {
        ArtifactStore::new(ArtifactLayout::new(temp.path()))
    }

    #[test]
    fn test_save_then_load_predicts_identically() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let id = RunId::parse("run-a").unwrap();
        let original = bundle(0.9, 0.6);

        let manifest = store.save(&id, &original).unwrap();
        assert_eq!(manifest.algorithm, "decision_tree");
        assert!(manifest.promotable());

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.transform, original.transform);
        assert_eq!(loaded.predict(&table()).unwrap(), original.predict(&table()).unwrap());
        assert!(!temp.path().join("staging").read_dir().unwrap().any(|_| true));
    }

    #[test]
    fn test_save_refuses_existing_run() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let id = RunId::parse("run-a").unwrap();
        store.save(&id, &bundle(0.9, 0.6)).unwrap();
        assert!(matches!(store.save(&id, &bundle(0.9, 0.6)), Err(PipelineError::ArtifactConflict { .. })));
    }

    #[test]
    fn test_missing_slots_are_not_found() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        assert!(matches!(store.load_final(), Err(PipelineError::ArtifactNotFound { .. })));
        assert!(matches!(
            store.load(&RunId::parse("nope").unwrap()),
            Err(PipelineError::ArtifactNotFound { .. })
        ));
        assert_eq!(store.final_manifest().unwrap(), None);
    }

    #[test]
    fn test_tampered_model_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let id = RunId::parse("run-a").unwrap();
        store.save(&id, &bundle(0.9, 0.6)).unwrap();

        let path = store.layout().run_dir(&id).join(MODEL_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 40;
        bytes[last] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(store.load(&id), Err(PipelineError::CorruptArtifact { .. })));
    }

    #[test]
    fn test_below_threshold_bundle_is_never_promoted() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let id = RunId::parse("weak").unwrap();
        store.save(&id, &bundle(0.4, 0.6)).unwrap();

        assert!(matches!(store.promote(&id), Err(PipelineError::TrainingBelowThreshold { .. })));
        assert_eq!(store.current_generation().unwrap(), None);
        assert!(matches!(store.load_final(), Err(PipelineError::ArtifactNotFound { .. })));
    }

    #[derive(Default)]
    struct CountingHook(AtomicU64);

    impl PromotionHook for CountingHook {
        fn on_promoted(&self, _run_id: &RunId, generation: u64) {
            self.0.store(generation, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_promote_advances_generation_and_prunes() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let hook = Arc::new(CountingHook::default());
        store.add_promotion_hook(&hook).unwrap();

        for (i, name) in ["r1", "r2", "r3"].iter().enumerate() {
            let id = RunId::parse(name).unwrap();
            store.save(&id, &bundle(0.9, 0.6)).unwrap();
            assert_eq!(store.promote(&id).unwrap(), i as u64 + 1);
        }

        assert_eq!(hook.0.load(Ordering::SeqCst), 3);
        assert_eq!(store.final_manifest().unwrap().unwrap().run_id.as_str(), "r3");
        assert!(!store.layout().generation_dir(1).exists());
        assert!(store.layout().generation_dir(2).exists());
        assert!(store.layout().generation_dir(3).exists());
        assert!(store.load_final().is_ok());
    }

    #[test]
    fn test_dropped_hooks_are_pruned_and_never_fire() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for _ in 0..50 {
            let transient = Arc::new(CountingHook::default());
            store.add_promotion_hook(&transient).unwrap();
        }
        assert_eq!(store.hook_count().unwrap(), 1);

        let live = Arc::new(CountingHook::default());
        store.add_promotion_hook(&live).unwrap();
        let dropped = Arc::new(CountingHook::default());
        store.add_promotion_hook(&dropped).unwrap();
        drop(dropped);

        let id = RunId::parse("r1").unwrap();
        store.save(&id, &bundle(0.9, 0.6)).unwrap();
        store.promote(&id).unwrap();

        assert_eq!(live.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.hook_count().unwrap(), 1);
    }
}
