//! Orchestrator configuration
//!
//! Loaded from `--config <path>` or `.recipe-forge/config.toml`; every field
//! has a default so a partial file is enough.

use crate::complexity::ComplexityConfig;
use crate::error::{ForgeError, Result};
use crate::executor::FailurePolicy;
use crate::pipeline::PipelineConfig;
use crate::services::CollaboratorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// One sub-directory per recipe
    pub recipes_dir: PathBuf,
    /// Generated artifacts land in `<output_dir>/<recipe>/`
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// The orchestrator's own source tree, never written to without confirmation
    pub source_root: PathBuf,
    /// Name of the recipe describing the orchestrator itself
    pub self_recipe: String,
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
    /// Output names the self-hosting build must produce
    pub self_hosting_manifest: Vec<String>,
    pub pipeline: PipelineConfig,
    pub complexity: ComplexityConfig,
    pub collaborators: CollaboratorConfig,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            recipes_dir: PathBuf::from("recipes"),
            output_dir: PathBuf::from("build"),
            cache_dir: PathBuf::from(".recipe-forge/cache"),
            source_root: default_source_root(),
            self_recipe: "recipe-forge".to_string(),
            max_parallel: 4,
            failure_policy: FailurePolicy::default(),
            self_hosting_manifest: vec![
                "README.md".to_string(),
                "pyproject.toml".to_string(),
                "src/__init__.py".to_string(),
            ],
            pipeline: PipelineConfig::default(),
            complexity: ComplexityConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

/// Workspace this binary was built from
fn default_source_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.parent().unwrap_or(manifest).to_path_buf()
}

impl ForgeConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from(".recipe-forge/config.toml")
    }

    /// Load `path`, or the default location, or fall back to defaults
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    debug!("No config at {}, using defaults", default.display());
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ForgeError::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ForgeError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(ForgeError::Config("max_parallel must be at least 1".to_string()));
        }
        if self.pipeline.max_failures_per_iteration == 0 {
            return Err(ForgeError::Config("pipeline.max_failures_per_iteration must be at least 1".to_string()));
        }
        let total = self.complexity.weights.total();
        if !(0.99..=1.01).contains(&total) {
            return Err(ForgeError::Config(format!("complexity weights must sum to 1.0, got {:.2}", total)));
        }
        Ok(())
    }
}
