use crate::error::PipelineResult;
use crate::history::RunId;
use std::path::{Path, PathBuf};

pub const PREPROCESSOR_FILE: &str = "preprocessor.bin";
pub const MODEL_FILE: &str = "model.bin";
pub const MANIFEST_FILE: &str = "bundle.json";

/// Filesystem layout for artifacts under one root.
///
/// ```text
/// <root>/runs/<run_id>/{preprocessor.bin, model.bin, bundle.json}
/// <root>/final/<generation>/...
/// <root>/final/CURRENT
/// <root>/records/<run_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir().join(run_id.as_str())
    }

    /// Scratch directory a bundle is written into before being renamed.
    #[must_use]
    pub fn staging_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join("staging").join(format!("{}.{}", run_id.as_str(), uuid::Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn final_dir(&self) -> PathBuf {
        self.root.join("final")
    }

    #[must_use]
    pub fn generation_dir(&self, generation: u64) -> PathBuf {
        self.final_dir().join(format!("{generation:08}"))
    }

    #[must_use]
    pub fn current_pointer(&self) -> PathBuf {
        self.final_dir().join("CURRENT")
    }

    #[must_use]
    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    #[must_use]
    pub fn record_path(&self, run_id: &RunId) -> PathBuf {
        self.records_dir().join(format!("{}.json", run_id.as_str()))
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    let file_name = path.file_name().map_or_else(|| "tmp".into(), |n| n.to_string_lossy().into_owned());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp.path());
        let id = RunId::parse("20260101-000000-abcd1234").unwrap();

        assert!(layout.run_dir(&id).ends_with("runs/20260101-000000-abcd1234"));
        assert!(layout.generation_dir(3).ends_with("final/00000003"));
        assert!(layout.record_path(&id).ends_with("records/20260101-000000-abcd1234.json"));
        assert_ne!(layout.staging_dir(&id), layout.staging_dir(&id));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CURRENT");
        write_atomic(&path, b"1").unwrap();
        write_atomic(&path, b"2").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"2");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }
}
