//! External collaborators driven by the pipeline
//!
//! Code and test generation, test execution, static quality checks and code
//! review sit behind async traits. Concrete implementations are chosen from
//! configuration; tests plug in scripted ones.

pub mod command;
pub mod review;
#[cfg(test)]
pub(crate) mod scripted;

pub use command::{
    CollaboratorConfig, CommandCodeGenerator, CommandQualityChecker, CommandSpec, CommandTestGenerator,
    CommandTestRunner,
};
pub use review::HeuristicReviewer;

use crate::error::{ForgeError, Result};
use crate::recipe::RecipeUnit;
use async_trait::async_trait;
use regex_utils::failure;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Generated files keyed by relative path
pub type FileSet = BTreeMap<String, String>;

/// Edit proposed by a fix attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FileChange {
    Write { path: String, content: String },
    Delete { path: String },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Apply `changes` in order, returning how many altered the file set
pub fn apply_changes(files: &mut FileSet, changes: &[FileChange]) -> usize {
    let mut applied = 0;
    for change in changes {
        let changed = match change {
            FileChange::Write { path, content } => {
                files.insert(path.clone(), content.clone()).as_ref() != Some(content)
            }
            FileChange::Delete { path } => files.remove(path).is_some(),
        };
        if changed {
            applied += 1;
        }
    }
    applied
}

/// Test files produced for a recipe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTests {
    pub files: FileSet,
    #[serde(default)]
    pub test_names: Vec<String>,
}

/// Failure class, in the order fixes are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Import,
    Syntax,
    Assertion,
    Other,
}

impl FailureKind {
    pub fn classify(message: &str) -> Self {
        if failure::is_import(message) {
            Self::Import
        } else if failure::is_syntax(message) {
            Self::Syntax
        } else if failure::is_assertion(message) {
            Self::Assertion
        } else {
            Self::Other
        }
    }

    /// Lower values are fixed first; import and syntax errors share the top rank
    pub fn rank(self) -> u8 {
        match self {
            Self::Import | Self::Syntax => 0,
            Self::Assertion => 1,
            Self::Other => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
    pub kind: FailureKind,
}

impl TestFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let kind = FailureKind::classify(&message);
        Self { name, message, kind }
    }
}

/// Pick the failures to address in one fix iteration
///
/// Stable by rank, so failures of equal rank keep reporting order.
pub fn prioritize(failures: &[TestFailure], limit: usize) -> Vec<TestFailure> {
    let mut ordered: Vec<TestFailure> = failures.to_vec();
    ordered.sort_by_key(|f| f.kind.rank());
    ordered.truncate(limit);
    ordered
}

/// Result of one test run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub failures: Vec<TestFailure>,
}

impl TestOutcome {
    pub fn failure_count(&self) -> usize {
        (self.failed + self.errored).max(self.failures.len())
    }

    pub fn all_passed(&self) -> bool {
        self.failure_count() == 0
    }

    /// Whether tests passing in `before` no longer pass here
    pub fn regressed_from(&self, before: &TestOutcome) -> bool {
        let previously_failing: BTreeSet<&str> = before.failures.iter().map(|f| f.name.as_str()).collect();
        self.passed < before.passed
            || self.failures.iter().any(|f| !previously_failing.contains(f.name.as_str()))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} skipped, {} errors",
            self.passed, self.failed, self.skipped, self.errored
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub file: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub findings: Vec<ReviewFinding>,
}

impl ReviewReport {
    pub fn warnings(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| f.severity != Severity::Info)
            .map(|f| format!("{}: {}", f.file, f.message))
            .collect()
    }
}

/// Produces and repairs implementation files
#[async_trait]
pub trait CodeGenerationService: Send + Sync {
    async fn generate(&self, unit: &RecipeUnit, dependency_outputs: &BTreeMap<String, FileSet>) -> Result<FileSet>;

    async fn fix(&self, files: &FileSet, failures: &[TestFailure]) -> Result<Vec<FileChange>>;
}

#[async_trait]
pub trait TestGenerationService: Send + Sync {
    async fn generate_tests(&self, unit: &RecipeUnit) -> Result<GeneratedTests>;
}

#[async_trait]
pub trait TestExecutionService: Send + Sync {
    async fn run(&self, dir: &Path) -> Result<TestOutcome>;
}

#[async_trait]
pub trait StaticQualityService: Send + Sync {
    /// Pass/fail per named check
    async fn check(&self, dir: &Path) -> Result<BTreeMap<String, bool>>;

    /// Apply in-place fixes
    async fn auto_fix(&self, dir: &Path) -> Result<()>;
}

#[async_trait]
pub trait CodeReviewService: Send + Sync {
    async fn review(&self, unit: &RecipeUnit, artifact: &FileSet) -> Result<ReviewReport>;
}

/// The set of collaborators one pipeline run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub code: Arc<dyn CodeGenerationService>,
    pub tests: Arc<dyn TestGenerationService>,
    pub runner: Arc<dyn TestExecutionService>,
    pub quality: Arc<dyn StaticQualityService>,
    pub review: Arc<dyn CodeReviewService>,
}

impl Collaborators {
    /// Command-backed collaborators from configuration
    pub fn from_config(config: &CollaboratorConfig) -> Result<Self> {
        let generator = config
            .code_generator
            .clone()
            .ok_or_else(|| ForgeError::Config("no code generator command configured".to_string()))?;
        let test_generator = config
            .test_generator
            .clone()
            .ok_or_else(|| ForgeError::Config("no test generator command configured".to_string()))?;

        Ok(Self {
            code: Arc::new(CommandCodeGenerator::new(generator)),
            tests: Arc::new(CommandTestGenerator::new(test_generator)),
            runner: Arc::new(CommandTestRunner::new(config.test_runner.clone())),
            quality: Arc::new(CommandQualityChecker::new(
                config.quality_checks.clone(),
                config.auto_fix.clone(),
            )),
            review: Arc::new(HeuristicReviewer::default()),
        })
    }
}

/// Bound a collaborator call; expiry becomes [`ForgeError::Timeout`]
pub async fn with_timeout<T, F>(operation: &str, duration: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, call).await {
        Ok(result) => result,
        Err(_) => Err(ForgeError::Timeout { operation: operation.to_string(), duration }),
    }
}
