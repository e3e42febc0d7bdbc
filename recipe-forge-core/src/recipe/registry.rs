//! Recipe registry backed by a directory of recipe descriptors
//!
//! Layout: `<root>/<name>/recipe.yaml`, `requirements.yaml` and an optional
//! `design.yaml`.

use super::{ComponentMetadata, Design, RecipeUnit, Requirements};
use crate::error::{ForgeError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File names that make up one recipe descriptor
pub struct RecipeFiles;

impl RecipeFiles {
    pub const METADATA: &'static str = "recipe.yaml";
    pub const REQUIREMENTS: &'static str = "requirements.yaml";
    pub const DESIGN: &'static str = "design.yaml";
}

/// Working set of recipes, keyed by name
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    units: BTreeMap<String, RecipeUnit>,
    load_errors: BTreeMap<String, String>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every recipe directory under `root`
    ///
    /// A broken descriptor does not abort the load; it is remembered so that
    /// requesting that recipe later reports the underlying problem.
    pub fn load(root: &Path) -> Result<Self> {
        let mut registry = Self::new();

        if !root.is_dir() {
            return Err(ForgeError::Config(format!(
                "recipes directory {} does not exist",
                root.display()
            )));
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join(RecipeFiles::METADATA).is_file())
            .collect();
        dirs.sort();

        for dir in dirs {
            let key = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            match Self::load_unit(&dir) {
                Ok(unit) => {
                    debug!("Loaded recipe {} from {}", unit.name(), dir.display());
                    registry.units.insert(unit.name().to_string(), unit);
                }
                Err(e) => {
                    warn!("Skipping recipe at {}: {}", dir.display(), e);
                    registry.load_errors.insert(key, e.to_string());
                }
            }
        }

        Ok(registry)
    }

    /// Load a single recipe directory
    pub fn load_unit(dir: &Path) -> Result<RecipeUnit> {
        let metadata: ComponentMetadata = read_yaml(&dir.join(RecipeFiles::METADATA))?;

        let requirements_path = dir.join(RecipeFiles::REQUIREMENTS);
        let requirements: Requirements = if requirements_path.is_file() {
            read_yaml(&requirements_path)?
        } else {
            Requirements::default()
        };

        let design_path = dir.join(RecipeFiles::DESIGN);
        let design: Option<Design> =
            if design_path.is_file() { Some(read_yaml(&design_path)?) } else { None };

        // The directory name identifies the recipe; metadata must agree with it
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| metadata.name.clone());

        RecipeUnit::new(name, requirements, design, metadata)
    }

    /// Write a recipe descriptor to `<root>/<name>/`
    pub fn write_unit(root: &Path, unit: &RecipeUnit) -> Result<PathBuf> {
        let dir = root.join(unit.name());
        fs::create_dir_all(&dir)?;

        fs::write(dir.join(RecipeFiles::METADATA), serde_yaml::to_string(unit.metadata())?)?;
        fs::write(dir.join(RecipeFiles::REQUIREMENTS), serde_yaml::to_string(&unit.requirements)?)?;
        if let Some(design) = &unit.design {
            fs::write(dir.join(RecipeFiles::DESIGN), serde_yaml::to_string(design)?)?;
        }

        Ok(dir)
    }

    pub fn insert(&mut self, unit: RecipeUnit) {
        self.units.insert(unit.name().to_string(), unit);
    }

    pub fn get(&self, name: &str) -> Option<&RecipeUnit> {
        self.units.get(name)
    }

    /// Look up a recipe, explaining why it is unavailable
    pub fn require(&self, name: &str) -> Result<&RecipeUnit> {
        if let Some(unit) = self.units.get(name) {
            return Ok(unit);
        }

        match self.load_errors.get(name) {
            Some(reason) => Err(ForgeError::structural(name, reason.clone())),
            None => Err(ForgeError::RecipeNotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn units(&self) -> impl Iterator<Item = &RecipeUnit> {
        self.units.values()
    }

    pub fn load_errors(&self) -> &BTreeMap<String, String> {
        &self.load_errors
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl FromIterator<RecipeUnit> for RecipeRegistry {
    fn from_iter<T: IntoIterator<Item = RecipeUnit>>(iter: T) -> Self {
        let mut registry = Self::new();
        for unit in iter {
            registry.insert(unit);
        }
        registry
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| {
        ForgeError::Validation(format!("failed to parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::fixtures;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_load_registry() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        write(&cache, RecipeFiles::METADATA, "name: cache\nversion: 0.2.0\ntype: library\ndependencies: [model]\n");
        write(
            &cache,
            RecipeFiles::REQUIREMENTS,
            "purpose: Cache build results\nrequirements:\n  - id: R1\n    description: Store records\n    priority: MUST\n",
        );
        let model = temp.path().join("model");
        write(&model, RecipeFiles::METADATA, "name: model\nversion: 0.1.0\ntype: core\n");

        let registry = RecipeRegistry::load(temp.path()).unwrap();

        assert_eq!(registry.len(), 2);
        let unit = registry.require("cache").unwrap();
        assert_eq!(unit.version(), "0.2.0");
        assert_eq!(unit.requirements.requirements.len(), 1);
        assert!(unit.design.is_none());
    }

    #[test]
    fn test_broken_recipe_is_skipped_and_reported() {
        let temp = TempDir::new().unwrap();
        let broken = temp.path().join("broken");
        write(&broken, RecipeFiles::METADATA, "name: somethingelse\nversion: 0.1.0\ntype: tool\n");
        let bad_yaml = temp.path().join("garbled");
        write(&bad_yaml, RecipeFiles::METADATA, "name: [unterminated");

        let registry = RecipeRegistry::load(temp.path()).unwrap();

        assert!(registry.is_empty());
        assert_eq!(registry.load_errors().len(), 2);
        assert!(matches!(registry.require("garbled"), Err(ForgeError::Structural { .. })));
        assert!(matches!(registry.require("missing"), Err(ForgeError::RecipeNotFound(_))));
    }

    #[test]
    fn test_write_then_load_unit() {
        let temp = TempDir::new().unwrap();
        let unit = fixtures::designed_unit("planner", 2, 3);

        let dir = RecipeRegistry::write_unit(temp.path(), &unit).unwrap();
        let loaded = RecipeRegistry::load_unit(&dir).unwrap();

        assert_eq!(loaded, unit);
    }
}
