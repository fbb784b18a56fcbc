//! CLI configuration loading.

use anyhow::{Context, Result};
use netguard_pipeline::PipelineConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCAL_CONFIG: &str = "netguard.toml";

/// Load the pipeline configuration.
///
/// Precedence:
/// 1. `--config`
/// 2. `./netguard.toml`
/// 3. Defaults
///
/// `--artifacts` overrides the artifact root from whichever source was used.
pub fn load(explicit: Option<&Path>, artifacts: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match explicit {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            PipelineConfig::load_from_file(path).context("Failed to load pipeline configuration")?
        }
        None if Path::new(LOCAL_CONFIG).is_file() => {
            debug!(path = LOCAL_CONFIG, "loading configuration");
            PipelineConfig::load_from_file(LOCAL_CONFIG).context("Failed to load ./netguard.toml")?
        }
        None => {
            debug!("no configuration file, using defaults");
            PipelineConfig::default()
        }
    };
    if let Some(root) = artifacts {
        config.artifacts.root = root;
    }
    debug!(artifacts = %config.artifacts.root.display(), "resolved artifact root");
    Ok(config)
}
