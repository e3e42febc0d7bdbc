//! Incremental builds over the recipe registry
//!
//! [`Forge`] resolves the build plan, drops units whose cached state is
//! current, and hands the rest to the [`ParallelExecutor`]. A rebuilt unit
//! forces its dependents to rebuild too.

use crate::complexity::decomposer::write_sub_units;
use crate::complexity::{
    ComplexityAnalyzer, ComplexityMetrics, DecompositionPlan, DecompositionStrategy, Decomposer,
};
use crate::config::ForgeConfig;
use crate::error::{ForgeError, Result};
use crate::executor::{CancelHandle, ExecutionReport, ParallelExecutor};
use crate::graph::{BuildPlan, DependencyResolver, ImpactReport};
use crate::guard::{Confirmation, SelfOverwriteGuard};
use crate::pipeline::workspace::load_dir;
use crate::pipeline::{PipelineContext, PipelineOrchestrator, PipelineRun, SelfHosting};
use crate::recipe::RecipeRegistry;
use crate::services::Collaborators;
use crate::state::{BuildResult, BuildState, BuildStateManager, RebuildReason};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Build this unit and its dependencies; `None` builds every recipe
    pub target: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    /// Overrides the configured output directory
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BuildReport {
    /// Full plan before up-to-date units were dropped
    pub plan: BuildPlan,
    /// Decision for every planned unit, in build order
    pub reasons: Vec<(String, RebuildReason)>,
    pub execution: ExecutionReport<PipelineRun>,
    pub output_root: PathBuf,
    pub dry_run: bool,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.execution.all_succeeded()
    }

    pub fn rebuilt(&self) -> impl Iterator<Item = &str> {
        self.reasons.iter().filter(|(_, r)| r.needs_rebuild()).map(|(n, _)| n.as_str())
    }

    pub fn up_to_date(&self) -> impl Iterator<Item = &str> {
        self.reasons.iter().filter(|(_, r)| !r.needs_rebuild()).map(|(n, _)| n.as_str())
    }
}

pub struct Forge {
    config: ForgeConfig,
    registry: Arc<RecipeRegistry>,
    state: Arc<BuildStateManager>,
    analyzer: Arc<ComplexityAnalyzer>,
    guard: Arc<SelfOverwriteGuard>,
    collaborators: Option<Collaborators>,
    executor: ParallelExecutor,
}

impl Forge {
    /// Load the registry and build cache named by `config`
    pub async fn open(config: ForgeConfig) -> Result<Self> {
        let registry = RecipeRegistry::load(&config.recipes_dir)?;
        for (name, reason) in registry.load_errors() {
            warn!("Recipe {} could not be loaded: {}", name, reason);
        }

        let collaborators = match Collaborators::from_config(&config.collaborators) {
            Ok(collaborators) => Some(collaborators),
            Err(e) => {
                debug!("Collaborators unavailable: {}", e);
                None
            }
        };

        let mut forge = Self::new(config, registry).await?;
        forge.collaborators = collaborators;
        Ok(forge)
    }

    /// Use an already loaded registry; no collaborators are attached
    pub async fn new(config: ForgeConfig, registry: RecipeRegistry) -> Result<Self> {
        config.validate()?;
        let state = BuildStateManager::open(&config.cache_dir).await?;
        let guard = SelfOverwriteGuard::new(&config.source_root)?;
        let executor = ParallelExecutor::new(config.max_parallel).with_policy(config.failure_policy);

        info!("Loaded {} recipes from {}", registry.len(), config.recipes_dir.display());
        Ok(Self {
            analyzer: Arc::new(ComplexityAnalyzer::new(config.complexity.clone())),
            registry: Arc::new(registry),
            state: Arc::new(state),
            guard: Arc::new(guard),
            collaborators: None,
            executor,
            config,
        })
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Permit writes into the source tree once `confirmation` approves them
    pub fn allow_self_overwrite(mut self, confirmation: Arc<dyn Confirmation>) -> Result<Self> {
        self.guard = Arc::new(SelfOverwriteGuard::new(&self.config.source_root)?.allow_override(confirmation));
        Ok(self)
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &RecipeRegistry {
        &self.registry
    }

    pub fn state(&self) -> &BuildStateManager {
        &self.state
    }

    pub fn guard(&self) -> &SelfOverwriteGuard {
        &self.guard
    }

    pub fn has_collaborators(&self) -> bool {
        self.collaborators.is_some()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.executor.cancel_handle()
    }

    pub fn orchestrator(&self, output_root: PathBuf) -> PipelineOrchestrator {
        let mut orchestrator = PipelineOrchestrator::new(
            self.config.pipeline.clone(),
            self.analyzer.clone(),
            self.guard.clone(),
            output_root,
        )
        .with_self_hosting(SelfHosting {
            recipe: self.config.self_recipe.clone(),
            manifest: self.config.self_hosting_manifest.clone(),
        });
        if let Some(collaborators) = &self.collaborators {
            orchestrator = orchestrator.with_collaborators(collaborators.clone());
        }
        orchestrator
    }

    pub fn plan(&self, target: Option<&str>) -> Result<BuildPlan> {
        let resolver = DependencyResolver::new(&self.registry);
        match target {
            Some(target) => resolver.resolve(target),
            None => resolver.resolve_all(),
        }
    }

    pub fn impact(&self, name: &str) -> Result<ImpactReport> {
        DependencyResolver::new(&self.registry).impact(name)
    }

    /// Rebuild decision for every unit of `plan`, in build order
    pub async fn rebuild_reasons(&self, plan: &BuildPlan, force: bool) -> Result<Vec<(String, RebuildReason)>> {
        let mut reasons = Vec::with_capacity(plan.order.len());
        let mut rebuilding: BTreeSet<&str> = BTreeSet::new();

        for name in &plan.order {
            let unit = self.registry.require(name)?;
            let mut reason = self.state.rebuild_reason(unit, force).await;
            if !reason.needs_rebuild() {
                if let Some(dep) = unit.dependencies().iter().find(|d| rebuilding.contains(d.as_str())) {
                    reason = RebuildReason::DependencyChanged { dependency: dep.clone() };
                }
            }
            if reason.needs_rebuild() {
                rebuilding.insert(name.as_str());
            }
            debug!("{}: {}", name, reason);
            reasons.push((name.clone(), reason));
        }

        Ok(reasons)
    }

    /// Build the target (or everything), skipping up-to-date units
    ///
    /// Graph and overwrite errors abort before any unit runs. Unit failures
    /// are reported in the returned [`BuildReport`].
    pub async fn build(&self, options: BuildOptions) -> Result<BuildReport> {
        let plan = self.plan(options.target.as_deref())?;
        let reasons = self.rebuild_reasons(&plan, options.force).await?;

        let stale: BTreeSet<String> =
            reasons.iter().filter(|(_, r)| r.needs_rebuild()).map(|(n, _)| n.clone()).collect();
        let mut pending = plan.clone();
        pending.retain(|name| stale.contains(name));
        info!(
            "{} of {} units need a build{}",
            pending.unit_count(),
            plan.unit_count(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        let output_root = options.output_dir.clone().unwrap_or_else(|| self.config.output_dir.clone());
        let output_root = if options.dry_run { output_root } else { self.guard.check(&output_root)? };

        let dependencies: BTreeMap<String, Vec<String>> = pending
            .order
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|unit| (unit.name().to_string(), unit.dependencies().iter().cloned().collect()))
            .collect();

        let registry = self.registry.clone();
        let state = self.state.clone();
        let orchestrator = Arc::new(self.orchestrator(output_root.clone()));
        let dry_run = options.dry_run;

        let execution = self
            .executor
            .execute(&pending.layers, &dependencies, move |name| {
                let registry = registry.clone();
                let state = state.clone();
                let orchestrator = orchestrator.clone();
                async move {
                    let unit = registry.require(&name)?;
                    if dry_run {
                        return Ok(orchestrator.dry_run(unit, &registry));
                    }

                    let mut ctx = PipelineContext::new(&registry);
                    for dep in unit.dependencies() {
                        match load_dir(&orchestrator.unit_dir(dep)) {
                            Ok(outputs) => {
                                ctx.dependency_outputs.insert(dep.clone(), outputs);
                            }
                            Err(e) => {
                                if let Err(record_err) = state.record_build(unit, &unreadable_dependency(dep, &e)).await {
                                    warn!("Could not record build of {}: {}", name, record_err);
                                }
                                return Err(e);
                            }
                        }
                    }

                    let run = orchestrator.run(unit, &ctx).await;
                    if let Err(e) = state.record_build(unit, &run.to_build_result()).await {
                        warn!("Could not record build of {}: {}", name, e);
                    }
                    Ok(run)
                }
            })
            .await;

        Ok(BuildReport { plan, reasons, execution, output_root, dry_run })
    }

    /// Run one unit's pipeline without building its dependencies
    pub async fn run_pipeline(&self, name: &str, output_dir: Option<PathBuf>) -> Result<PipelineRun> {
        let unit = self.registry.require(name)?;
        let output_root = output_dir.unwrap_or_else(|| self.config.output_dir.clone());
        let orchestrator = self.orchestrator(output_root);

        let mut ctx = PipelineContext::new(&self.registry);
        for dep in unit.dependencies() {
            let outputs = match load_dir(&orchestrator.unit_dir(dep)) {
                Ok(outputs) => outputs,
                Err(e) => {
                    self.state.record_build(unit, &unreadable_dependency(dep, &e)).await?;
                    return Err(e);
                }
            };
            if outputs.is_empty() {
                warn!("Dependency {} of {} has no built output", dep, name);
            }
            ctx.dependency_outputs.insert(dep.clone(), outputs);
        }

        let run = orchestrator.run(unit, &ctx).await;
        self.state.record_build(unit, &run.to_build_result()).await?;
        Ok(run)
    }

    /// Metrics of `name` and, when it is too complex or `always_plan` is set,
    /// a decomposition plan
    pub fn analyze(&self, name: &str, always_plan: bool) -> Result<(Arc<ComplexityMetrics>, Option<DecompositionPlan>)> {
        let unit = self.registry.require(name)?;
        let metrics = self.analyzer.analyze(unit);
        let decomposer = Decomposer::new(&self.analyzer);

        let plan = match decomposer.plan(unit)? {
            Some(plan) => Some(plan),
            None if always_plan => {
                let strategy = metrics.strategy.unwrap_or(if metrics.components == 0 {
                    DecompositionStrategy::FeatureChunking
                } else {
                    DecompositionStrategy::ComponentGrouping
                });
                Some(decomposer.decompose(unit, strategy)?)
            }
            None => None,
        };
        Ok((metrics, plan))
    }

    /// Write the sub-recipes of `plan` next to the other recipes
    pub fn write_decomposition(&self, plan: &DecompositionPlan) -> Result<Vec<PathBuf>> {
        write_sub_units(plan, &self.config.recipes_dir, &self.guard)
    }

    /// Manifest entries missing from the self-hosting output under `output_root`
    pub fn verify_self_hosting(&self, output_root: &Path) -> Result<Vec<String>> {
        let built = load_dir(&output_root.join(&self.config.self_recipe))?;
        Ok(self
            .config
            .self_hosting_manifest
            .iter()
            .filter(|name| !built.contains_key(*name))
            .cloned()
            .collect())
    }

    pub async fn status(&self) -> Vec<(String, Option<BuildState>, RebuildReason)> {
        let mut rows = Vec::new();
        for unit in self.registry.units() {
            let state = self.state.get(unit.name()).await;
            let reason = self.state.rebuild_reason(unit, false).await;
            rows.push((unit.name().to_string(), state, reason));
        }
        rows
    }

    /// Forget cached state for one recipe, or all of them
    pub async fn clean(&self, name: Option<&str>) -> Result<usize> {
        match name {
            Some(name) => {
                self.analyzer.invalidate(name);
                Ok(usize::from(self.state.invalidate(name).await?))
            }
            None => self.state.clear().await,
        }
    }
}

fn unreadable_dependency(dep: &str, e: &ForgeError) -> BuildResult {
    BuildResult {
        success: false,
        errors: vec![format!("could not read output of dependency {}: {}", dep, e)],
        ..Default::default()
    }
}
