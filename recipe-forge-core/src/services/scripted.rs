//! In-memory collaborators for tests

use super::{
    CodeGenerationService, CodeReviewService, Collaborators, FileChange, FileSet, GeneratedTests, ReviewReport,
    StaticQualityService, TestExecutionService, TestFailure, TestGenerationService, TestOutcome,
};
use crate::error::{ForgeError, Result};
use crate::recipe::RecipeUnit;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type FixFn = dyn Fn(usize, &FileSet, &[TestFailure]) -> Result<Vec<FileChange>> + Send + Sync;

pub struct ScriptedGenerator {
    pub initial: Result<FileSet>,
    fix: Box<FixFn>,
    pub generate_calls: AtomicUsize,
    pub fix_calls: AtomicUsize,
    pub seen_dependencies: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    /// Generator whose fix mode never proposes anything
    pub fn stubborn(initial: FileSet) -> Self {
        Self::with_fix(initial, |_, _, _| Ok(Vec::new()))
    }

    pub fn with_fix<F>(initial: FileSet, fix: F) -> Self
    where
        F: Fn(usize, &FileSet, &[TestFailure]) -> Result<Vec<FileChange>> + Send + Sync + 'static,
    {
        Self {
            initial: Ok(initial),
            fix: Box::new(fix),
            generate_calls: AtomicUsize::new(0),
            fix_calls: AtomicUsize::new(0),
            seen_dependencies: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self { initial: Err(ForgeError::Generation("generator offline".to_string())), ..Self::stubborn(FileSet::new()) }
    }
}

#[async_trait]
impl CodeGenerationService for ScriptedGenerator {
    async fn generate(&self, _unit: &RecipeUnit, dependency_outputs: &BTreeMap<String, FileSet>) -> Result<FileSet> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_dependencies.lock().unwrap().extend(dependency_outputs.keys().cloned());
        match &self.initial {
            Ok(files) => Ok(files.clone()),
            Err(e) => Err(ForgeError::Generation(e.to_string())),
        }
    }

    async fn fix(&self, files: &FileSet, failures: &[TestFailure]) -> Result<Vec<FileChange>> {
        let call = self.fix_calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.fix)(call, files, failures)
    }
}

pub struct ScriptedTests(pub GeneratedTests);

#[async_trait]
impl TestGenerationService for ScriptedTests {
    async fn generate_tests(&self, _unit: &RecipeUnit) -> Result<GeneratedTests> {
        Ok(self.0.clone())
    }
}

type JudgeFn = dyn Fn(&Path) -> TestOutcome + Send + Sync;

/// Test runner that judges the files on disk
pub struct ScriptedRunner {
    judge: Box<JudgeFn>,
    pub runs: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new<F>(judge: F) -> Self
    where
        F: Fn(&Path) -> TestOutcome + Send + Sync + 'static,
    {
        Self { judge: Box::new(judge), runs: AtomicUsize::new(0) }
    }

    /// Pass once every `(file, needle)` pair is present, fail otherwise
    pub fn expecting(expectations: Vec<(&'static str, &'static str)>) -> Self {
        Self::new(move |dir| {
            let mut outcome = TestOutcome::default();
            for (file, needle) in &expectations {
                let content = std::fs::read_to_string(dir.join(file)).unwrap_or_default();
                if content.contains(needle) {
                    outcome.passed += 1;
                } else {
                    outcome.failed += 1;
                    let message = if content.is_empty() {
                        format!("ModuleNotFoundError: No module named '{}'", file.trim_end_matches(".py"))
                    } else {
                        format!("AssertionError: {} lacks {}", file, needle)
                    };
                    outcome.failures.push(TestFailure::new(format!("test_{}", needle), message));
                }
            }
            outcome
        })
    }
}

#[async_trait]
impl TestExecutionService for ScriptedRunner {
    async fn run(&self, dir: &Path) -> Result<TestOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok((self.judge)(dir))
    }
}

/// Quality checks with a fixed verdict; auto-fix applies scripted edits on disk
pub struct ScriptedQuality {
    pub verdicts: BTreeMap<String, bool>,
    pub auto_fix_edits: Vec<(String, String)>,
    pub auto_fix_calls: AtomicUsize,
}

impl ScriptedQuality {
    pub fn passing() -> Self {
        Self::new(BTreeMap::from([("lint".to_string(), true)]), Vec::new())
    }

    pub fn new(verdicts: BTreeMap<String, bool>, auto_fix_edits: Vec<(String, String)>) -> Self {
        Self { verdicts, auto_fix_edits, auto_fix_calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl StaticQualityService for ScriptedQuality {
    async fn check(&self, _dir: &Path) -> Result<BTreeMap<String, bool>> {
        Ok(self.verdicts.clone())
    }

    async fn auto_fix(&self, dir: &Path) -> Result<()> {
        self.auto_fix_calls.fetch_add(1, Ordering::SeqCst);
        for (file, content) in &self.auto_fix_edits {
            std::fs::write(dir.join(file), content)?;
        }
        Ok(())
    }
}

pub struct SilentReview;

#[async_trait]
impl CodeReviewService for SilentReview {
    async fn review(&self, _unit: &RecipeUnit, _artifact: &FileSet) -> Result<ReviewReport> {
        Ok(ReviewReport::default())
    }
}

pub fn collaborators(
    code: Arc<dyn CodeGenerationService>,
    tests: GeneratedTests,
    runner: Arc<dyn TestExecutionService>,
    quality: Arc<dyn StaticQualityService>,
) -> Collaborators {
    Collaborators { code, tests: Arc::new(ScriptedTests(tests)), runner, quality, review: Arc::new(SilentReview) }
}

pub fn files(entries: &[(&str, &str)]) -> FileSet {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
