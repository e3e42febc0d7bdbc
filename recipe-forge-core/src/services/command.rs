//! Collaborators backed by external programs
//!
//! Generators receive a JSON request on stdin and answer with JSON on stdout.
//! Test runners and quality checks are plain commands run in the output
//! directory. Every child is spawned with `kill_on_drop`, so abandoning the
//! future (timeout, cancellation) also kills the process.

use super::{
    CodeGenerationService, FileChange, FileSet, GeneratedTests, StaticQualityService, TestExecutionService,
    TestFailure, TestGenerationService, TestOutcome,
};
use crate::error::{ForgeError, Result};
use crate::recipe::RecipeUnit;
use async_trait::async_trait;
use regex_utils::test_summary;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// An external program invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { program: program.into(), args: args.into_iter().map(Into::into).collect(), env: BTreeMap::new() }
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        command
    }

    /// Run to completion, feeding `input` on stdin
    pub async fn run(&self, dir: Option<&Path>, input: Option<&[u8]>) -> Result<Output> {
        debug!("Running {} {:?}", self.program, self.args);

        let mut child = self.command(dir).spawn().map_err(|e| {
            ForgeError::Generation(format!("failed to start '{}': {}", self.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = input {
                stdin.write_all(input).await?;
            }
            // Dropping stdin closes the pipe
        }

        Ok(child.wait_with_output().await?)
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Which programs implement each collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub code_generator: Option<CommandSpec>,
    pub test_generator: Option<CommandSpec>,
    pub test_runner: CommandSpec,
    pub quality_checks: BTreeMap<String, CommandSpec>,
    pub auto_fix: Vec<CommandSpec>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            code_generator: None,
            test_generator: None,
            test_runner: CommandSpec::new("pytest", ["-q", "-rfE"]),
            quality_checks: BTreeMap::from([
                ("lint".to_string(), CommandSpec::new("ruff", ["check", "."])),
                ("format".to_string(), CommandSpec::new("ruff", ["format", "--check", "."])),
            ]),
            auto_fix: vec![
                CommandSpec::new("ruff", ["check", "--fix", "."]),
                CommandSpec::new("ruff", ["format", "."]),
            ],
        }
    }
}

/// Request body sent to generator programs
fn unit_request(unit: &RecipeUnit) -> serde_json::Value {
    json!({
        "name": unit.name(),
        "metadata": unit.metadata(),
        "requirements": unit.requirements,
        "design": unit.design,
    })
}

async fn exchange<T: serde::de::DeserializeOwned>(spec: &CommandSpec, request: serde_json::Value) -> Result<T> {
    let input = serde_json::to_vec(&request)?;
    let output = spec.run(None, Some(&input)).await?;

    if !output.status.success() {
        return Err(ForgeError::Generation(format!(
            "'{}' exited with {}: {}",
            spec.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| ForgeError::Generation(format!("malformed output from '{}': {}", spec.display(), e)))
}

#[derive(Deserialize)]
struct FilesResponse {
    files: FileSet,
}

#[derive(Deserialize)]
struct ChangesResponse {
    #[serde(default)]
    changes: Vec<FileChange>,
}

pub struct CommandCodeGenerator {
    spec: CommandSpec,
}

impl CommandCodeGenerator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl CodeGenerationService for CommandCodeGenerator {
    async fn generate(&self, unit: &RecipeUnit, dependency_outputs: &BTreeMap<String, FileSet>) -> Result<FileSet> {
        let request = json!({
            "mode": "generate",
            "unit": unit_request(unit),
            "dependency_outputs": dependency_outputs,
        });
        let response: FilesResponse = exchange(&self.spec, request).await?;
        Ok(response.files)
    }

    async fn fix(&self, files: &FileSet, failures: &[TestFailure]) -> Result<Vec<FileChange>> {
        let request = json!({ "mode": "fix", "files": files, "failures": failures });
        let response: ChangesResponse = exchange(&self.spec, request).await?;
        Ok(response.changes)
    }
}

pub struct CommandTestGenerator {
    spec: CommandSpec,
}

impl CommandTestGenerator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl TestGenerationService for CommandTestGenerator {
    async fn generate_tests(&self, unit: &RecipeUnit) -> Result<GeneratedTests> {
        exchange(&self.spec, json!({ "mode": "tests", "unit": unit_request(unit) })).await
    }
}

pub struct CommandTestRunner {
    spec: CommandSpec,
}

impl CommandTestRunner {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl TestExecutionService for CommandTestRunner {
    async fn run(&self, dir: &Path) -> Result<TestOutcome> {
        let output = self.spec.run(Some(dir), None).await?;
        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        let outcome = parse_test_output(&text, output.status.success());
        debug!("Tests in {}: {}", dir.display(), outcome.summary());
        Ok(outcome)
    }
}

/// Build a [`TestOutcome`] from runner output
///
/// A failing exit status with nothing recognizable in the output counts as a
/// single error so the run is never mistaken for a pass.
pub fn parse_test_output(text: &str, exit_success: bool) -> TestOutcome {
    let mut outcome = TestOutcome {
        passed: test_summary::count(&test_summary::PASSED, text),
        failed: test_summary::count(&test_summary::FAILED, text),
        skipped: test_summary::count(&test_summary::SKIPPED, text),
        errored: test_summary::count(&test_summary::ERRORED, text),
        failures: test_summary::failures(text)
            .into_iter()
            .map(|(name, message)| TestFailure::new(name, message))
            .collect(),
    };

    if !exit_success && outcome.failure_count() == 0 {
        let tail: Vec<&str> = text.lines().rev().take(20).collect();
        let message = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
        outcome.errored = 1;
        outcome.failures.push(TestFailure::new("<test command>", message));
    }

    outcome
}

pub struct CommandQualityChecker {
    checks: BTreeMap<String, CommandSpec>,
    fixers: Vec<CommandSpec>,
}

impl CommandQualityChecker {
    pub fn new(checks: BTreeMap<String, CommandSpec>, fixers: Vec<CommandSpec>) -> Self {
        Self { checks, fixers }
    }
}

#[async_trait]
impl StaticQualityService for CommandQualityChecker {
    async fn check(&self, dir: &Path) -> Result<BTreeMap<String, bool>> {
        let mut results = BTreeMap::new();
        for (name, spec) in &self.checks {
            let passed = match spec.run(Some(dir), None).await {
                Ok(output) => output.status.success(),
                Err(e) => {
                    debug!("Quality check {} could not run: {}", name, e);
                    false
                }
            };
            results.insert(name.clone(), passed);
        }
        Ok(results)
    }

    async fn auto_fix(&self, dir: &Path) -> Result<()> {
        for spec in &self.fixers {
            let output = spec.run(Some(dir), None).await?;
            if !output.status.success() {
                debug!("Auto-fix '{}' exited with {}", spec.display(), output.status);
            }
        }
        Ok(())
    }
}
