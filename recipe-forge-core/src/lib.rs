//! Core functionality for recipe-forge
//!
//! This crate contains the build orchestration logic: the recipe registry,
//! dependency resolution, incremental build state, complexity analysis, the
//! per-recipe pipeline and the parallel executor that drives it.

pub mod builder;
pub mod complexity;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod guard;
pub mod pipeline;
pub mod recipe;
pub mod services;
pub mod state;

pub use builder::{BuildOptions, BuildReport, Forge};
pub use config::ForgeConfig;
pub use error::{ForgeError, GraphError, Result};
pub use executor::{ExecutionReport, FailurePolicy, ParallelExecutor, UnitStatus};
pub use guard::{AutoConfirm, Confirmation, DenyConfirm, SelfOverwriteGuard};
pub use pipeline::{PipelineRun, PipelineStage};
pub use recipe::{RecipeRegistry, RecipeUnit};
pub use state::{BuildStateManager, RebuildReason};
