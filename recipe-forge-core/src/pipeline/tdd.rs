//! RED, GREEN and REFACTOR phases of a pipeline run

use super::{FixAttempt, PipelineConfig, Workspace};
use crate::error::Result;
use crate::recipe::RecipeUnit;
use crate::services::{
    apply_changes, prioritize, with_timeout, Collaborators, FileSet, GeneratedTests, TestFailure, TestOutcome,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub struct RedOutcome {
    pub tests: GeneratedTests,
    /// Placeholder modules written so the tests can be loaded
    pub stubs: FileSet,
    pub outcome: TestOutcome,
    pub warnings: Vec<String>,
}

pub struct GreenOutcome {
    pub success: bool,
    /// Implementation files: the passing set, or the best one seen
    pub files: FileSet,
    pub outcome: TestOutcome,
    pub attempts: Vec<FixAttempt>,
    pub generation_error: Option<String>,
}

pub struct RefactorOutcome {
    pub checks: BTreeMap<String, bool>,
    pub tests: FileSet,
    pub files: FileSet,
    pub outcome: TestOutcome,
    pub reverted: bool,
}

pub struct TddCycle<'a> {
    collaborators: &'a Collaborators,
    config: &'a PipelineConfig,
}

impl<'a> TddCycle<'a> {
    pub fn new(collaborators: &'a Collaborators, config: &'a PipelineConfig) -> Self {
        Self { collaborators, config }
    }

    /// Generate tests, make them loadable and watch them fail
    pub async fn red(&self, unit: &RecipeUnit, workspace: &mut Workspace) -> Result<RedOutcome> {
        let tests = with_timeout(
            "test generation",
            self.config.timeout(),
            self.collaborators.tests.generate_tests(unit),
        )
        .await?;
        debug!("Generated {} test files for {}", tests.files.len(), unit.name());

        let stubs = placeholder_stubs(unit, &self.config.language, &tests.files);
        let outcome = self.run_tests(workspace, &tests.files, &stubs).await;

        let mut warnings = Vec::new();
        if tests.files.is_empty() {
            warnings.push("test generator produced no test files".to_string());
        } else if outcome.all_passed() {
            warn!("Tests for {} pass before any implementation exists", unit.name());
            warnings.push("all tests pass before implementation; they may not test anything".to_string());
        }

        Ok(RedOutcome { tests, stubs, outcome, warnings })
    }

    /// Generate an implementation, then fix it until the tests pass or the
    /// iteration cap is reached
    pub async fn green(
        &self,
        unit: &RecipeUnit,
        dependency_outputs: &BTreeMap<String, FileSet>,
        tests: &FileSet,
        workspace: &mut Workspace,
    ) -> GreenOutcome {
        let timeout = self.config.timeout();
        let code = &self.collaborators.code;

        let (mut files, generation_error) =
            match with_timeout("code generation", timeout, code.generate(unit, dependency_outputs)).await {
                Ok(files) => (files, None),
                Err(e) => {
                    warn!("Initial generation for {} failed: {}", unit.name(), e);
                    (FileSet::new(), Some(e.to_string()))
                }
            };

        let mut outcome = self.run_tests(workspace, tests, &files).await;
        let mut best = (files.clone(), outcome.clone());
        let mut attempts = Vec::new();

        for iteration in 1..=self.config.max_fix_iterations {
            if outcome.all_passed() {
                break;
            }

            let targeted = targets(&outcome, self.config.max_failures_per_iteration);
            let mut attempt = FixAttempt {
                iteration,
                targeted: targeted.clone(),
                changes: Vec::new(),
                outcome: outcome.clone(),
                success: false,
                no_progress: true,
                error: None,
            };

            match with_timeout("fix", timeout, code.fix(&files, &targeted)).await {
                Ok(changes) => {
                    if apply_changes(&mut files, &changes) > 0 {
                        attempt.no_progress = false;
                        outcome = self.run_tests(workspace, tests, &files).await;
                    }
                    attempt.changes = changes;
                }
                Err(e) => {
                    debug!("Fix iteration {} for {} failed: {}", iteration, unit.name(), e);
                    attempt.error = Some(e.to_string());
                }
            }

            attempt.outcome = outcome.clone();
            attempt.success = outcome.all_passed();
            if outcome.failure_count() < best.1.failure_count() {
                best = (files.clone(), outcome.clone());
            }

            debug!(
                "Fix iteration {}/{} for {}: {}{}",
                iteration,
                self.config.max_fix_iterations,
                unit.name(),
                outcome.summary(),
                if attempt.no_progress { " (no progress)" } else { "" }
            );

            let stop = attempt.no_progress && self.config.stop_on_no_progress;
            attempts.push(attempt);
            if stop {
                info!("Stopping fix loop for {} after an iteration without changes", unit.name());
                break;
            }
        }

        let success = outcome.all_passed();
        if !success {
            info!(
                "Fix loop for {} ended after {} iterations with {} failures; keeping best artifact",
                unit.name(),
                attempts.len(),
                best.1.failure_count()
            );
            (files, outcome) = best;
            if let Err(e) = workspace.sync(&merged(tests, &files)).await {
                warn!("Could not restore best artifact for {}: {}", unit.name(), e);
            }
        }

        GreenOutcome { success, files, outcome, attempts, generation_error }
    }

    /// Apply static-quality fixes unless they break tests that passed before
    pub async fn refactor(
        &self,
        tests: FileSet,
        files: FileSet,
        before: TestOutcome,
        workspace: &mut Workspace,
    ) -> Result<RefactorOutcome> {
        let timeout = self.config.timeout();
        let quality = &self.collaborators.quality;

        let checks = with_timeout("quality check", timeout, quality.check(workspace.dir())).await?;
        if checks.values().all(|passed| *passed) {
            return Ok(RefactorOutcome { checks, tests, files, outcome: before, reverted: false });
        }

        with_timeout("auto-fix", timeout, quality.auto_fix(workspace.dir())).await?;
        let names: Vec<String> = files.keys().chain(tests.keys()).cloned().collect();
        let reread = workspace.read_back(&names).await?;
        let fixed_files: FileSet = reread.iter().filter(|(k, _)| files.contains_key(*k)).map(clone_entry).collect();
        let fixed_tests: FileSet = reread.iter().filter(|(k, _)| tests.contains_key(*k)).map(clone_entry).collect();

        let outcome = self.run_tests(workspace, &fixed_tests, &fixed_files).await;
        if outcome.regressed_from(&before) {
            warn!("Auto-fix broke passing tests ({}); reverting", outcome.summary());
            workspace.sync(&merged(&tests, &files)).await?;
            return Ok(RefactorOutcome { checks, tests, files, outcome: before, reverted: true });
        }

        Ok(RefactorOutcome { checks, tests: fixed_tests, files: fixed_files, outcome, reverted: false })
    }

    /// Write tests and implementation, then run the tests; failures to do so
    /// become an errored outcome
    pub async fn run_tests(&self, workspace: &mut Workspace, tests: &FileSet, files: &FileSet) -> TestOutcome {
        if let Err(e) = workspace.sync(&merged(tests, files)).await {
            return errored("<workspace>", e.to_string());
        }

        match with_timeout("test run", self.config.timeout(), self.collaborators.runner.run(workspace.dir())).await {
            Ok(outcome) => outcome,
            Err(e) => errored("<test run>", e.to_string()),
        }
    }
}

fn clone_entry((k, v): (&String, &String)) -> (String, String) {
    (k.clone(), v.clone())
}

fn errored(name: &str, message: String) -> TestOutcome {
    TestOutcome { errored: 1, failures: vec![TestFailure::new(name, message)], ..Default::default() }
}

/// Failures to hand to the fix collaborator this iteration
fn targets(outcome: &TestOutcome, limit: usize) -> Vec<TestFailure> {
    if outcome.failures.is_empty() {
        return vec![TestFailure::new("<unknown>", outcome.summary())];
    }
    prioritize(&outcome.failures, limit)
}

/// Implementation files overlaid with tests; tests win on a name clash
pub fn merged(tests: &FileSet, files: &FileSet) -> FileSet {
    let mut all = files.clone();
    all.extend(tests.iter().map(|(k, v)| (k.clone(), v.clone())));
    all
}

/// Empty modules for each designed component so generated tests can import them
pub fn placeholder_stubs(unit: &RecipeUnit, language: &str, tests: &FileSet) -> FileSet {
    if !language.eq_ignore_ascii_case("python") {
        debug!("No placeholder synthesis for language {}", language);
        return FileSet::new();
    }

    let mut stubs = FileSet::new();
    if unit.components().is_empty() {
        stubs.insert(format!("{}.py", snake_case(unit.name())), format!("# placeholder for {}\n", unit.name()));
    }

    for component in unit.components() {
        let class = component.type_name.clone().unwrap_or_else(|| component.name.clone());
        let mut body = format!("class {}:\n", python_identifier(&class));
        let methods: Vec<String> = component
            .methods
            .iter()
            .filter_map(|signature| method_name(signature))
            .collect();
        if methods.is_empty() {
            body.push_str("    pass\n");
        }
        for method in methods {
            body.push_str(&format!(
                "    def {}(self, *args, **kwargs):\n        raise NotImplementedError\n",
                method
            ));
        }
        stubs.insert(format!("{}.py", snake_case(&component.name)), body);
    }

    stubs.retain(|name, _| !tests.contains_key(name));
    stubs
}

/// `get(key: str) -> str` -> `get`
fn method_name(signature: &str) -> Option<String> {
    let trimmed = signature.trim().trim_start_matches("def ").trim_start_matches("fn ");
    let name: String = trimmed.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    (!name.is_empty() && !name.starts_with(|c: char| c.is_ascii_digit())).then_some(name)
}

fn python_identifier(name: &str) -> String {
    let ident: String = name.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", ident)
    } else {
        ident
    }
}

/// `CacheStore` / `cache-store` -> `cache_store`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_lower = true;
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
