//! On-disk working directory of one pipeline run

use crate::error::{ForgeError, Result};
use crate::services::FileSet;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::warn;
use walkdir::WalkDir;

/// Names written by the last sync, kept next to the files
pub const MANIFEST: &str = ".recipe-forge-files.json";

/// Mirrors a [`FileSet`] into a directory
pub struct Workspace {
    dir: PathBuf,
    written: FileSet,
}

impl Workspace {
    /// Open `dir`, taking over the files an earlier build recorded there
    pub async fn create(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;

        let mut written = FileSet::new();
        let manifest = dir.join(MANIFEST);
        if fs::try_exists(&manifest).await? {
            let content = fs::read_to_string(&manifest).await?;
            let names: Vec<String> = serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable {}: {}", manifest.display(), e);
                Vec::new()
            });
            for name in names {
                let Ok(rel) = relative(&name) else {
                    continue;
                };
                if let Ok(content) = fs::read_to_string(dir.join(rel)).await {
                    written.insert(name, content);
                }
            }
        }

        Ok(Self { dir, written })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Make the directory hold exactly `files` among the files this workspace wrote
    pub async fn sync(&mut self, files: &FileSet) -> Result<()> {
        for (name, content) in files {
            if self.written.get(name) == Some(content) {
                continue;
            }
            let path = self.dir.join(relative(name)?);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, content).await?;
        }

        let stale: Vec<String> = self.written.keys().filter(|name| !files.contains_key(*name)).cloned().collect();
        for name in stale {
            let path = self.dir.join(relative(&name)?);
            if fs::try_exists(&path).await? {
                fs::remove_file(&path).await?;
            }
        }

        self.written = files.clone();
        let names: Vec<&String> = self.written.keys().collect();
        fs::write(self.dir.join(MANIFEST), serde_json::to_string_pretty(&names)?).await?;
        Ok(())
    }

    /// Re-read `names` after an in-place edit by an external tool
    pub async fn read_back(&mut self, names: &[String]) -> Result<FileSet> {
        let mut files = FileSet::new();
        for name in names {
            let path = self.dir.join(relative(name)?);
            if let Ok(content) = fs::read_to_string(&path).await {
                self.written.insert(name.clone(), content.clone());
                files.insert(name.clone(), content);
            }
        }
        Ok(files)
    }
}

/// Reject absolute paths and `..` in generated file names
fn relative(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let valid = !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if valid {
        Ok(path.to_path_buf())
    } else {
        Err(ForgeError::Validation(format!("generated file name '{}' escapes the output directory", name)))
    }
}

/// Load every file under `dir` into a [`FileSet`]
pub fn load_dir(dir: &Path) -> Result<FileSet> {
    let mut files = FileSet::new();
    if !dir.exists() {
        return Ok(files);
    }
    if !dir.is_dir() {
        return Err(ForgeError::Io(std::io::Error::other(format!("{} is not a directory", dir.display()))));
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ForgeError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() || entry.file_name() == MANIFEST {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            let name = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
            files.insert(name, content);
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scripted::files;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sync_writes_and_prunes() {
        let temp = TempDir::new().unwrap();
        let mut workspace = Workspace::create(temp.path().join("unit")).await.unwrap();

        workspace.sync(&files(&[("a.py", "1"), ("pkg/b.py", "2")])).await.unwrap();
        assert!(workspace.dir().join("pkg/b.py").exists());

        workspace.sync(&files(&[("a.py", "3")])).await.unwrap();
        assert!(!workspace.dir().join("pkg/b.py").exists());
        assert_eq!(std::fs::read_to_string(workspace.dir().join("a.py")).unwrap(), "3");

        assert_eq!(load_dir(workspace.dir()).unwrap(), files(&[("a.py", "3")]));
    }

    #[tokio::test]
    async fn test_files_from_an_earlier_build_are_pruned() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("unit");
        let mut first = Workspace::create(dir.clone()).await.unwrap();
        first.sync(&files(&[("a.py", "1"), ("old.py", "2")])).await.unwrap();
        std::fs::write(dir.join("notes.txt"), "kept").unwrap();

        let mut second = Workspace::create(dir.clone()).await.unwrap();
        second.sync(&files(&[("a.py", "1")])).await.unwrap();

        assert!(!dir.join("old.py").exists());
        assert!(dir.join("notes.txt").exists());
        assert_eq!(load_dir(&dir).unwrap(), files(&[("a.py", "1"), ("notes.txt", "kept")]));
    }

    #[tokio::test]
    async fn test_escaping_names_are_rejected() {
        let temp = TempDir::new().unwrap();
        let mut workspace = Workspace::create(temp.path().join("unit")).await.unwrap();

        let result = workspace.sync(&files(&[("../evil.py", "x")])).await;
        assert!(matches!(result, Err(ForgeError::Validation(_))));
        assert!(relative("/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_read_back_picks_up_external_edits() {
        let temp = TempDir::new().unwrap();
        let mut workspace = Workspace::create(temp.path().to_path_buf()).await.unwrap();
        let set = files(&[("a.py", "x=1")]);
        workspace.sync(&set).await.unwrap();

        std::fs::write(temp.path().join("a.py"), "x = 1\n").unwrap();
        let names: Vec<String> = set.keys().cloned().collect();
        let reread = workspace.read_back(&names).await.unwrap();
        assert_eq!(reread.get("a.py").map(String::as_str), Some("x = 1\n"));
    }
}
