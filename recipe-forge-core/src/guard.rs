//! Protection against writing build output into the orchestrator's own tree

use crate::error::{ForgeError, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Asks whether an overlapping write may proceed
pub trait Confirmation: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Approves every request (for `--yes`)
pub struct AutoConfirm;

impl Confirmation for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Rejects every request
pub struct DenyConfirm;

impl Confirmation for DenyConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

pub struct SelfOverwriteGuard {
    source_root: PathBuf,
    override_confirmation: Option<Arc<dyn Confirmation>>,
    confirmed: Mutex<Vec<PathBuf>>,
}

impl SelfOverwriteGuard {
    pub fn new(source_root: &Path) -> Result<Self> {
        Ok(Self {
            source_root: resolve(source_root)?,
            override_confirmation: None,
            confirmed: Mutex::new(Vec::new()),
        })
    }

    /// Permit overlapping writes once `confirmation` approves them
    pub fn allow_override(mut self, confirmation: Arc<dyn Confirmation>) -> Self {
        self.override_confirmation = Some(confirmation);
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Whether `output` and the source tree contain one another
    pub fn overlaps(&self, output: &Path) -> Result<bool> {
        let output = resolve(output)?;
        Ok(output.starts_with(&self.source_root) || self.source_root.starts_with(&output))
    }

    /// Resolve `output`, refusing it if it overlaps the source tree without a
    /// confirmed override
    pub fn check(&self, output: &Path) -> Result<PathBuf> {
        let resolved = resolve(output)?;
        if !(resolved.starts_with(&self.source_root) || self.source_root.starts_with(&resolved)) {
            return Ok(resolved);
        }

        let Some(confirmation) = &self.override_confirmation else {
            return Err(ForgeError::SelfOverwrite {
                output: resolved,
                source_root: self.source_root.clone(),
            });
        };

        let mut confirmed = self.confirmed.lock().unwrap_or_else(|e| e.into_inner());
        if confirmed.iter().any(|p| resolved.starts_with(p)) {
            return Ok(resolved);
        }

        let prompt = format!(
            "Output {} overlaps the orchestrator source tree {}. Overwrite?",
            resolved.display(),
            self.source_root.display()
        );
        if !confirmation.confirm(&prompt) {
            return Err(ForgeError::OverwriteNotConfirmed);
        }

        warn!("Writing into the orchestrator source tree at {}", resolved.display());
        confirmed.push(resolved.clone());
        Ok(resolved)
    }
}

/// Canonical absolute form of `path`, which need not exist yet
///
/// `.` and `..` are folded lexically, then the closest existing ancestor is
/// canonicalized and the missing tail appended.
pub fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                existing.pop();
            }
            Component::CurDir => {}
            other => existing.push(other.as_os_str()),
        }
    }

    let mut missing = Vec::new();
    while !existing.exists() {
        let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
            break;
        };
        missing.push(name);
        existing.pop();
    }

    let mut resolved = if existing.exists() { existing.canonicalize()? } else { existing };
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingConfirm(AtomicUsize);

    impl Confirmation for CountingConfirm {
        fn confirm(&self, _prompt: &str) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn layout() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("forge");
        std::fs::create_dir_all(source.join("src")).unwrap();
        (temp, source)
    }

    #[test]
    fn test_disjoint_output_is_allowed() {
        let (temp, source) = layout();
        let guard = SelfOverwriteGuard::new(&source).unwrap();

        let out = guard.check(&temp.path().join("build/out")).unwrap();
        assert!(out.ends_with("build/out"));
    }

    #[test]
    fn test_output_inside_source_is_rejected() {
        let (_temp, source) = layout();
        let guard = SelfOverwriteGuard::new(&source).unwrap();

        let err = guard.check(&source.join("src/generated")).unwrap_err();
        assert!(matches!(err, ForgeError::SelfOverwrite { .. }));
    }

    #[test]
    fn test_output_containing_source_is_rejected() {
        let (temp, source) = layout();
        let guard = SelfOverwriteGuard::new(&source).unwrap();

        assert!(guard.overlaps(temp.path()).unwrap());
        assert!(guard.check(temp.path()).is_err());
    }

    #[test]
    fn test_parent_components_are_normalized() {
        let (temp, source) = layout();
        let guard = SelfOverwriteGuard::new(&source).unwrap();

        let sneaky = temp.path().join("elsewhere/../forge/new-dir");
        assert!(guard.overlaps(&sneaky).unwrap());
    }

    #[test]
    fn test_override_requires_confirmation() {
        let (_temp, source) = layout();
        let denied = SelfOverwriteGuard::new(&source).unwrap().allow_override(Arc::new(DenyConfirm));
        assert!(matches!(denied.check(&source), Err(ForgeError::OverwriteNotConfirmed)));

        let counter = Arc::new(CountingConfirm(AtomicUsize::new(0)));
        let approved = SelfOverwriteGuard::new(&source).unwrap().allow_override(counter.clone());
        approved.check(&source).unwrap();
        approved.check(&source.join("src/unit")).unwrap();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
