//! Layer-by-layer parallel execution of unit builds
//!
//! Layers run strictly in order. Inside a layer up to `max_parallel` units
//! run as tokio tasks gated by a semaphore, and results are collected as
//! they complete. Errors and panics from the build function become failed
//! results; they never abort the rest of the build.

use crate::error::Result;
use crate::pipeline::PipelineRun;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// What happens to downstream units when a unit fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Attempt every unit regardless of upstream failures
    #[default]
    Continue,
    /// Skip units with a failed or skipped dependency
    SkipDependents,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::SkipDependents => write!(f, "skip-dependents"),
        }
    }
}

/// Output of a unit build that knows whether it succeeded
pub trait UnitOutcome {
    fn succeeded(&self) -> bool;
}

impl UnitOutcome for PipelineRun {
    fn succeeded(&self) -> bool {
        self.success
    }
}

impl UnitOutcome for bool {
    fn succeeded(&self) -> bool {
        *self
    }
}

#[derive(Debug, Clone)]
pub enum UnitStatus<T> {
    Succeeded(T),
    /// The build ran and reported failure, returned an error or panicked
    Failed { output: Option<T>, error: Option<String> },
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct UnitReport<T> {
    pub name: String,
    pub layer: usize,
    pub status: UnitStatus<T>,
    pub duration: Duration,
}

impl<T> UnitReport<T> {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, UnitStatus::Succeeded(_))
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, UnitStatus::Failed { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self.status, UnitStatus::Skipped { .. })
    }

    pub fn output(&self) -> Option<&T> {
        match &self.status {
            UnitStatus::Succeeded(output) => Some(output),
            UnitStatus::Failed { output, .. } => output.as_ref(),
            UnitStatus::Skipped { .. } => None,
        }
    }
}

/// Per-unit results in completion order
#[derive(Debug, Clone)]
pub struct ExecutionReport<T> {
    pub results: Vec<UnitReport<T>>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl<T> ExecutionReport<T> {
    pub fn get(&self, name: &str) -> Option<&UnitReport<T>> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &UnitReport<T>> {
        self.results.iter().filter(|r| r.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport<T>> {
        self.results.iter().filter(|r| r.failed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &UnitReport<T>> {
        self.results.iter().filter(|r| r.skipped())
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.succeeded())
    }
}

/// Stops dispatch of new units and aborts in-flight ones
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

pub struct ParallelExecutor {
    max_parallel: usize,
    policy: FailurePolicy,
    cancel: Arc<watch::Sender<bool>>,
}

impl ParallelExecutor {
    pub fn new(max_parallel: usize) -> Self {
        let (cancel, _) = watch::channel(false);
        Self { max_parallel: max_parallel.max(1), policy: FailurePolicy::default(), cancel: Arc::new(cancel) }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Build every unit of `layers`, in layer order
    ///
    /// `dependencies` maps a unit to its direct dependencies; it is only
    /// consulted under [`FailurePolicy::SkipDependents`].
    pub async fn execute<T, F, Fut>(
        &self,
        layers: &[Vec<String>],
        dependencies: &BTreeMap<String, Vec<String>>,
        build: F,
    ) -> ExecutionReport<T>
    where
        T: UnitOutcome + Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let started = Instant::now();
        let build = Arc::new(build);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut cancel_rx = self.cancel.subscribe();
        let mut results = Vec::new();
        let mut blocked: BTreeSet<String> = BTreeSet::new();
        let mut cancelled = *cancel_rx.borrow_and_update();

        info!(
            "Executing {} layers with up to {} parallel units ({} policy)",
            layers.len(),
            self.max_parallel,
            self.policy
        );

        for (layer_idx, layer) in layers.iter().enumerate() {
            let mut pending = FuturesUnordered::new();
            let mut aborts = Vec::new();

            for name in layer {
                if cancelled {
                    results.push(skipped(name, layer_idx, "build cancelled"));
                    continue;
                }
                if self.policy == FailurePolicy::SkipDependents {
                    let failed_dep = dependencies
                        .get(name)
                        .and_then(|deps| deps.iter().find(|dep| blocked.contains(*dep)));
                    if let Some(dep) = failed_dep {
                        warn!("Skipping {}: dependency {} did not build", name, dep);
                        results.push(skipped(name, layer_idx, &format!("dependency '{}' did not build", dep)));
                        blocked.insert(name.clone());
                        continue;
                    }
                }

                let build = build.clone();
                let semaphore = semaphore.clone();
                let unit = name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let unit_started = Instant::now();
                    debug!("Building {}", unit);
                    let result = build(unit).await;
                    (result, unit_started.elapsed())
                });
                aborts.push(handle.abort_handle());

                let name = name.clone();
                pending.push(async move { (name, handle.await) });
            }

            loop {
                tokio::select! {
                    next = pending.next() => {
                        let Some((name, joined)) = next else {
                            break;
                        };
                        let report = match joined {
                            Ok((Ok(output), duration)) if output.succeeded() => UnitReport {
                                name, layer: layer_idx, status: UnitStatus::Succeeded(output), duration,
                            },
                            Ok((Ok(output), duration)) => UnitReport {
                                name, layer: layer_idx, status: UnitStatus::Failed { output: Some(output), error: None }, duration,
                            },
                            Ok((Err(e), duration)) => UnitReport {
                                name, layer: layer_idx, status: UnitStatus::Failed { output: None, error: Some(e.to_string()) }, duration,
                            },
                            Err(e) if e.is_cancelled() => skipped(&name, layer_idx, "build cancelled"),
                            Err(e) => {
                                error!("Build task for {} panicked: {}", name, e);
                                UnitReport {
                                    name, layer: layer_idx,
                                    status: UnitStatus::Failed { output: None, error: Some(format!("build task panicked: {}", e)) },
                                    duration: Duration::ZERO,
                                }
                            }
                        };
                        if !report.succeeded() {
                            blocked.insert(report.name.clone());
                        }
                        results.push(report);
                    }
                    changed = cancel_rx.changed(), if !cancelled => {
                        if changed.is_err() || *cancel_rx.borrow_and_update() {
                            warn!("Build cancelled; aborting {} in-flight units", aborts.len());
                            cancelled = true;
                            for abort in &aborts {
                                abort.abort();
                            }
                        }
                    }
                }
            }

            debug!("Layer {} finished", layer_idx);
        }

        let report = ExecutionReport { results, cancelled, duration: started.elapsed() };
        info!(
            "Execution finished: {} succeeded, {} failed, {} skipped",
            report.succeeded().count(),
            report.failed().count(),
            report.skipped().count()
        );
        report
    }
}

fn skipped<T>(name: &str, layer: usize, reason: &str) -> UnitReport<T> {
    UnitReport {
        name: name.to_string(),
        layer,
        status: UnitStatus::Skipped { reason: reason.to_string() },
        duration: Duration::ZERO,
    }
}
