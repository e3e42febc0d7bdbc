//! Build state cache for incremental rebuilds
//!
//! One JSON record per recipe lives in the cache directory. Reads are served
//! from memory; writes go through a single writer and replace the record
//! atomically so concurrent builds never interleave partial files.

pub mod checksum;

pub use checksum::checksum;

use crate::error::{ForgeError, Result};
use crate::recipe::RecipeUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome of the last build of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Persisted record for one recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub unit: String,
    pub last_checksum: String,
    pub last_build_time: DateTime<Utc>,
    pub last_outcome: BuildOutcome,
    #[serde(default)]
    pub output_files: Vec<String>,
}

/// What a finished build reports back to the cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    pub output_files: Vec<String>,
    pub errors: Vec<String>,
}

/// Why a recipe has to be rebuilt (or not)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    NeverBuilt,
    ContentChanged { previous: String, current: String },
    PreviousFailure,
    /// Unchanged itself, but a dependency is being rebuilt
    DependencyChanged { dependency: String },
    UpToDate,
}

impl RebuildReason {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, RebuildReason::UpToDate)
    }
}

impl std::fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forced => write!(f, "forced"),
            Self::NeverBuilt => write!(f, "never built"),
            Self::ContentChanged { .. } => write!(f, "content changed"),
            Self::PreviousFailure => write!(f, "previous build failed"),
            Self::DependencyChanged { dependency } => write!(f, "dependency {} is rebuilt", dependency),
            Self::UpToDate => write!(f, "up to date"),
        }
    }
}

pub struct BuildStateManager {
    cache_dir: PathBuf,
    states: RwLock<BTreeMap<String, BuildState>>,
    writer: Mutex<()>,
}

impl BuildStateManager {
    /// Open the cache directory, loading every readable record
    pub async fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).await?;

        let states = Self::load_records(&cache_dir).await?;
        debug!("Loaded {} build records from {}", states.len(), cache_dir.display());

        Ok(Self { cache_dir, states: RwLock::new(states), writer: Mutex::new(()) })
    }

    async fn load_records(cache_dir: &Path) -> Result<BTreeMap<String, BuildState>> {
        let mut states = BTreeMap::new();
        let mut entries = fs::read_dir(cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(state) => {
                    states.insert(state.unit.clone(), state);
                }
                Err(e) => warn!("Ignoring unreadable build record {}: {}", path.display(), e),
            }
        }

        Ok(states)
    }

    async fn read_record(path: &Path) -> Result<BuildState> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| ForgeError::persistence(path.display().to_string(), e.to_string()))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Decide whether `unit` must be rebuilt, and why
    pub async fn rebuild_reason(&self, unit: &RecipeUnit, force: bool) -> RebuildReason {
        if force {
            return RebuildReason::Forced;
        }

        let states = self.states.read().await;
        let Some(state) = states.get(unit.name()) else {
            return RebuildReason::NeverBuilt;
        };

        let current = checksum(unit);
        if current != state.last_checksum {
            return RebuildReason::ContentChanged { previous: state.last_checksum.clone(), current };
        }

        if !state.last_outcome.success {
            return RebuildReason::PreviousFailure;
        }

        RebuildReason::UpToDate
    }

    pub async fn needs_rebuild(&self, unit: &RecipeUnit, force: bool) -> bool {
        self.rebuild_reason(unit, force).await.needs_rebuild()
    }

    /// Store the outcome of a build
    pub async fn record_build(&self, unit: &RecipeUnit, result: &BuildResult) -> Result<BuildState> {
        let state = BuildState {
            unit: unit.name().to_string(),
            last_checksum: checksum(unit),
            last_build_time: Utc::now(),
            last_outcome: BuildOutcome { success: result.success, errors: result.errors.clone() },
            output_files: result.output_files.clone(),
        };

        let _guard = self.writer.lock().await;
        self.write_record(&state).await?;
        self.states.write().await.insert(state.unit.clone(), state.clone());

        info!(
            "Recorded {} build of {}",
            if result.success { "successful" } else { "failed" },
            unit.name()
        );
        Ok(state)
    }

    async fn write_record(&self, state: &BuildState) -> Result<()> {
        let path = self.record_path(&state.unit);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)?;

        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await.map_err(|e| ForgeError::persistence(state.unit.clone(), e.to_string()))
    }

    fn record_path(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{}.json", file))
    }

    pub async fn get(&self, name: &str) -> Option<BuildState> {
        self.states.read().await.get(name).cloned()
    }

    /// Snapshot of every record, ordered by recipe name
    pub async fn states(&self) -> Vec<BuildState> {
        self.states.read().await.values().cloned().collect()
    }

    /// Forget the record of one recipe
    pub async fn invalidate(&self, name: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let removed = self.states.write().await.remove(name).is_some();

        let path = self.record_path(name);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }

        Ok(removed)
    }

    /// Forget every record
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let mut states = self.states.write().await;
        let count = states.len();

        for name in states.keys() {
            let path = self.record_path(name);
            if fs::try_exists(&path).await? {
                fs::remove_file(&path).await?;
            }
        }
        states.clear();

        Ok(count)
    }
}
