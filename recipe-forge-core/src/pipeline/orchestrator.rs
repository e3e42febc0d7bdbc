//! Stage sequencing for one recipe

use super::tdd::{merged, snake_case, TddCycle};
use super::{PipelineConfig, PipelineRun, PipelineStage, StageResult, Workspace};
use crate::complexity::{ComplexityAnalyzer, Decomposer};
use crate::guard::SelfOverwriteGuard;
use crate::recipe::{Priority, RecipeRegistry, RecipeUnit, Requirement};
use crate::services::{with_timeout, Collaborators, FileSet, TestOutcome};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Manifest the orchestrator's own recipe must produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfHosting {
    pub recipe: String,
    pub manifest: Vec<String>,
}

/// What a run needs from the surrounding build
pub struct PipelineContext<'a> {
    pub registry: &'a RecipeRegistry,
    /// Artifacts of the unit's dependencies, keyed by dependency name
    pub dependency_outputs: BTreeMap<String, FileSet>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(registry: &'a RecipeRegistry) -> Self {
        Self { registry, dependency_outputs: BTreeMap::new() }
    }
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    analyzer: Arc<ComplexityAnalyzer>,
    guard: Arc<SelfOverwriteGuard>,
    output_root: PathBuf,
    collaborators: Option<Collaborators>,
    self_hosting: Option<SelfHosting>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        analyzer: Arc<ComplexityAnalyzer>,
        guard: Arc<SelfOverwriteGuard>,
        output_root: PathBuf,
    ) -> Self {
        Self { config, analyzer, guard, output_root, collaborators: None, self_hosting: None }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    pub fn with_self_hosting(mut self, self_hosting: SelfHosting) -> Self {
        self.self_hosting = Some(self_hosting);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn unit_dir(&self, name: &str) -> PathBuf {
        self.output_root.join(name)
    }

    /// Validate and score a recipe without generating anything
    pub fn dry_run(&self, unit: &RecipeUnit, registry: &RecipeRegistry) -> PipelineRun {
        let mut run = PipelineRun::new(unit.name());
        run.dry_run = true;

        if run.push(validate(unit, registry)) {
            run.push(self.evaluate_complexity(unit));
        }
        run
    }

    /// Run every stage for `unit`
    ///
    /// Failures are reported in the returned run; a blocking failure ends the
    /// run after the failing stage.
    pub async fn run(&self, unit: &RecipeUnit, ctx: &PipelineContext<'_>) -> PipelineRun {
        let mut run = PipelineRun::new(unit.name());
        info!("Pipeline {} started for {}", run.id, unit.name());

        let started = Instant::now();
        let mut validation = validate(unit, ctx.registry);
        let mut workspace = None;
        if validation.success {
            match self.prepare_workspace(unit).await {
                Ok(ws) => workspace = Some(ws),
                Err(e) => validation.fail(e),
            }
        }
        validation.duration = started.elapsed();
        if !run.push(validation) {
            error!("Validation failed for {}", unit.name());
            return run;
        }
        let Some(mut workspace) = workspace else {
            return run;
        };
        run.output_dir = Some(workspace.dir().to_path_buf());

        run.push(self.evaluate_complexity(unit));

        let Some(collaborators) = &self.collaborators else {
            let mut red = StageResult::new(PipelineStage::Red);
            red.fail("no collaborators configured");
            run.push(red);
            run.success = false;
            return run;
        };
        let tdd = TddCycle::new(collaborators, &self.config);

        // RED
        let started = Instant::now();
        let mut red_stage = StageResult::new(PipelineStage::Red);
        let mut tests = FileSet::new();
        let mut test_names = Vec::new();
        match tdd.red(unit, &mut workspace).await {
            Ok(red) => {
                red_stage.insert("test_files", red.tests.files.keys().collect::<Vec<_>>());
                red_stage.insert("test_names", &red.tests.test_names);
                red_stage.insert("placeholders", red.stubs.keys().collect::<Vec<_>>());
                red_stage.insert("outcome", &red.outcome);
                red_stage.warnings.extend(red.warnings);
                tests = red.tests.files;
                test_names = red.tests.test_names;
            }
            Err(e) => red_stage.fail(format!("test generation failed: {}", e)),
        }
        red_stage.duration = started.elapsed();
        run.push(red_stage);

        // GREEN
        let started = Instant::now();
        let green = tdd.green(unit, &ctx.dependency_outputs, &tests, &mut workspace).await;
        let mut green_stage = StageResult::new(PipelineStage::Green);
        green_stage.insert("iterations", green.attempts.len());
        green_stage.insert("no_progress_iterations", green.attempts.iter().filter(|a| a.no_progress).count());
        green_stage.insert("outcome", &green.outcome);
        if let Some(e) = &green.generation_error {
            green_stage.warn(format!("initial generation failed: {}", e));
        }
        if !green.success {
            green_stage.fail(format!(
                "tests still failing after {} fix iterations ({})",
                green.attempts.len(),
                green.outcome.summary()
            ));
        }
        green_stage.duration = started.elapsed();
        run.push(green_stage);
        run.fix_attempts = green.attempts;

        // REFACTOR
        let started = Instant::now();
        let mut refactor_stage = StageResult::new(PipelineStage::Refactor);
        let mut quality_broken = false;
        let (tests, files, outcome) =
            match tdd.refactor(tests.clone(), green.files.clone(), green.outcome.clone(), &mut workspace).await {
                Ok(refactor) => {
                    refactor_stage.insert("checks", &refactor.checks);
                    refactor_stage.insert("reverted", refactor.reverted);
                    if refactor.reverted {
                        refactor_stage.fail("auto-fix broke passing tests; reverted to the pre-refactor artifact");
                        quality_broken = true;
                    }
                    (refactor.tests, refactor.files, refactor.outcome)
                }
                Err(e) => {
                    refactor_stage.fail(format!("quality collaborator failed: {}", e));
                    (tests, green.files, green.outcome)
                }
            };
        refactor_stage.duration = started.elapsed();
        run.push(refactor_stage);

        run.artifact = merged(&tests, &files);
        let write_error = match workspace.sync(&run.artifact).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Could not write final artifact for {}: {}", unit.name(), e);
                Some(e.to_string())
            }
        };

        let review = self.review_code(collaborators, unit, &run.artifact).await;
        run.push(review);

        if !run.push(self.quality_gates(collaborators, &workspace, quality_broken).await) {
            return self.finish(run);
        }

        let post = post_validate(unit, &files, &outcome, &test_names, &run.artifact);
        if !run.push(post) {
            return self.finish(run);
        }

        let compliance = check_compliance(unit, &test_names, &run.artifact);
        run.push(compliance);

        let completeness = self.check_artifact_completeness(unit, &files, &run.artifact, write_error.as_deref());
        run.push(completeness);

        self.finish(run)
    }

    fn finish(&self, run: PipelineRun) -> PipelineRun {
        if run.success {
            info!("Pipeline succeeded for {} in {:.1?}", run.unit, run.duration());
        } else {
            error!("Pipeline failed for {}: {}", run.unit, run.errors().join("; "));
        }
        run
    }

    async fn prepare_workspace(&self, unit: &RecipeUnit) -> Result<Workspace, String> {
        let dir = self.guard.check(&self.unit_dir(unit.name())).map_err(|e| e.to_string())?;
        Workspace::create(dir).await.map_err(|e| e.to_string())
    }

    fn evaluate_complexity(&self, unit: &RecipeUnit) -> StageResult {
        let started = Instant::now();
        let mut stage = StageResult::new(PipelineStage::EvaluateComplexity);

        let metrics = self.analyzer.analyze(unit);
        stage.insert("metrics", metrics.as_ref());

        if metrics.should_decompose {
            stage.warn(format!("recipe exceeds complexity limits: {}", metrics.reasons.join(", ")));
            match Decomposer::new(&self.analyzer).plan(unit) {
                Ok(Some(plan)) => {
                    stage.insert("decomposition_strategy", plan.strategy);
                    stage.insert("decomposition", plan.names());
                }
                Ok(None) => {}
                Err(e) => stage.warn(format!("decomposition failed: {}", e)),
            }
        }

        stage.duration = started.elapsed();
        stage
    }

    async fn review_code(&self, collaborators: &Collaborators, unit: &RecipeUnit, artifact: &FileSet) -> StageResult {
        let started = Instant::now();
        let mut stage = StageResult::new(PipelineStage::ReviewCode);

        match with_timeout("review", self.config.timeout(), collaborators.review.review(unit, artifact)).await {
            Ok(report) => {
                stage.insert("findings", report.findings.len());
                stage.warnings.extend(report.warnings());
            }
            Err(e) => stage.warn(format!("review unavailable: {}", e)),
        }

        stage.duration = started.elapsed();
        stage
    }

    async fn quality_gates(&self, collaborators: &Collaborators, workspace: &Workspace, broken: bool) -> StageResult {
        let started = Instant::now();
        let mut stage = StageResult::new(PipelineStage::RunQualityGates);

        if broken {
            stage.fail("quality fixes were reverted because they broke tests");
        } else {
            match with_timeout("quality check", self.config.timeout(), collaborators.quality.check(workspace.dir()))
                .await
            {
                Ok(checks) => {
                    for (name, passed) in &checks {
                        if !passed {
                            stage.fail(format!("quality check '{}' failed", name));
                        }
                    }
                    stage.insert("checks", &checks);
                }
                Err(e) => stage.fail(format!("quality checks could not run: {}", e)),
            }
        }

        stage.duration = started.elapsed();
        stage
    }

    fn check_artifact_completeness(
        &self,
        unit: &RecipeUnit,
        files: &FileSet,
        artifact: &FileSet,
        write_error: Option<&str>,
    ) -> StageResult {
        let started = Instant::now();
        let mut stage = StageResult::new(PipelineStage::CheckArtifactCompleteness);

        if let Some(e) = write_error {
            stage.fail(format!("artifact was not written to disk: {}", e));
        }
        for (name, content) in artifact {
            if content.trim().is_empty() && !is_package_marker(name) {
                stage.fail(format!("{} is empty", name));
            }
        }

        match &self.self_hosting {
            Some(hosting) if hosting.recipe == unit.name() => {
                stage.insert("self_hosting", true);
                let missing: Vec<&String> =
                    hosting.manifest.iter().filter(|name| !artifact.contains_key(*name)).collect();
                for name in &missing {
                    stage.fail(format!("self-hosting output is missing {}", name));
                }
                stage.insert("manifest_missing", missing);
            }
            _ => {
                for component in unit.components() {
                    if !mentions(files, &component.name) {
                        stage.fail(format!("no output implements component {}", component.name));
                    }
                }
            }
        }

        debug!("Artifact completeness for {}: {}", unit.name(), stage.success);
        stage.duration = started.elapsed();
        stage
    }
}

/// Required fields and resolvable dependencies
fn validate(unit: &RecipeUnit, registry: &RecipeRegistry) -> StageResult {
    let started = Instant::now();
    let mut stage = StageResult::new(PipelineStage::Validate);

    if unit.version().trim().is_empty() {
        stage.fail("version is missing");
    }
    if unit.requirements.requirements.is_empty() {
        stage.fail("recipe has no requirements");
    }
    for dep in unit.dependencies() {
        if !registry.contains(dep) {
            stage.fail(format!("dependency '{}' is not in the registry", dep));
        }
    }

    stage.insert("requirements", unit.requirements.requirements.len());
    stage.insert("dependencies", unit.dependencies());
    stage.duration = started.elapsed();
    stage
}

fn post_validate(
    unit: &RecipeUnit,
    files: &FileSet,
    outcome: &TestOutcome,
    test_names: &[String],
    artifact: &FileSet,
) -> StageResult {
    let started = Instant::now();
    let mut stage = StageResult::new(PipelineStage::PostValidate);

    if files.is_empty() {
        stage.fail("no implementation files were produced");
    }
    if !outcome.all_passed() {
        stage.fail(format!("tests are not green: {}", outcome.summary()));
    }

    let uncovered: Vec<&str> = unit
        .requirements
        .by_priority(Priority::Must)
        .filter(|r| !references(r, test_names, artifact))
        .map(|r| r.id.as_str())
        .collect();
    for id in &uncovered {
        stage.fail(format!("MUST requirement {} has no test or artifact reference", id));
    }

    stage.insert("outcome", outcome);
    stage.duration = started.elapsed();
    stage
}

fn check_compliance(unit: &RecipeUnit, test_names: &[String], artifact: &FileSet) -> StageResult {
    let started = Instant::now();
    let mut stage = StageResult::new(PipelineStage::CheckCompliance);

    let mut covered = 0;
    for requirement in &unit.requirements.requirements {
        if references(requirement, test_names, artifact) {
            covered += 1;
        } else if requirement.priority == Priority::Should {
            stage.warn(format!("SHOULD requirement {} is not referenced", requirement.id));
        }
    }
    let non_functional = unit.requirements.non_functional_count();
    if non_functional > 0 {
        stage.warn(format!("{} non-functional requirements need manual verification", non_functional));
    }

    stage.insert("covered_requirements", covered);
    stage.insert("total_requirements", unit.requirements.requirements.len());
    stage.duration = started.elapsed();
    stage
}

/// Whether a test name or any artifact file refers to the requirement id
fn references(requirement: &Requirement, test_names: &[String], artifact: &FileSet) -> bool {
    let id = requirement.id.to_lowercase();
    let alt = id.replace('-', "_");
    let hit = |text: &str| {
        let text = text.to_lowercase();
        text.contains(&id) || text.contains(&alt)
    };

    test_names.iter().any(|n| hit(n.as_str()))
        || artifact.iter().any(|(name, content)| hit(name.as_str()) || hit(content.as_str()))
}

/// Files that are legitimately empty, such as `__init__.py`
fn is_package_marker(name: &str) -> bool {
    matches!(Path::new(name).file_name().and_then(|n| n.to_str()), Some("__init__.py" | "py.typed"))
}

fn mentions(files: &FileSet, component: &str) -> bool {
    let plain = component.to_lowercase();
    let snake = snake_case(component);
    files.iter().any(|(name, content)| {
        let name = name.to_lowercase();
        name.contains(&snake) || name.contains(&plain) || content.contains(component)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::fixtures::unit;
    use crate::services::scripted::files;
    use std::time::Duration;
    use tempfile::TempDir;

    fn orchestrator(temp: &TempDir) -> PipelineOrchestrator {
        let guard = Arc::new(SelfOverwriteGuard::new(&temp.path().join("forge-src")).unwrap());
        PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(ComplexityAnalyzer::default()),
            guard,
            temp.path().join("out"),
        )
    }

    #[test]
    fn test_empty_package_markers_are_complete() {
        let temp = TempDir::new().unwrap();
        let cache = unit("cache", &[]);
        let impl_files = files(&[("cache.py", "def get(key):\n    return key\n"), ("pkg/__init__.py", "")]);

        let stage = orchestrator(&temp).check_artifact_completeness(&cache, &impl_files, &impl_files, None);
        assert!(stage.success, "errors: {:?}", stage.errors);

        let with_blank = files(&[("cache.py", "def get(key):\n    return key\n"), ("helpers.py", "  \n")]);
        let stage = orchestrator(&temp).check_artifact_completeness(&cache, &with_blank, &with_blank, None);
        assert_eq!(stage.errors, vec!["helpers.py is empty".to_string()]);
    }

    #[test]
    fn test_unwritten_artifact_is_incomplete() {
        let temp = TempDir::new().unwrap();
        let cache = unit("cache", &[]);
        let impl_files = files(&[("cache.py", "def get(key):\n    return key\n")]);

        let stage =
            orchestrator(&temp).check_artifact_completeness(&cache, &impl_files, &impl_files, Some("disk full"));

        assert!(!stage.success);
        assert!(stage.errors[0].contains("disk full"));
        assert!(stage.duration > Duration::ZERO);
    }

    #[test]
    fn test_gate_stages_record_duration() {
        let cache = unit("cache", &[]);
        let artifact = files(&[("cache.py", "def get(key):\n    return key\n")]);
        let outcome = TestOutcome { passed: 1, ..Default::default() };

        let post = post_validate(&cache, &artifact, &outcome, &["test_cache_r1".to_string()], &artifact);
        let compliance = check_compliance(&cache, &["test_cache_r1".to_string()], &artifact);

        assert!(post.duration > Duration::ZERO);
        assert!(compliance.duration > Duration::ZERO);
    }
}
