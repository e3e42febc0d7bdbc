//! Per-recipe build pipeline
//!
//! A run walks a fixed stage sequence. `Validate` and the three blocking gates
//! stop the run on failure; advisory stages only add warnings. The RED, GREEN
//! and REFACTOR stages form the test-first cycle in [`tdd`].

pub mod orchestrator;
pub mod tdd;
pub mod workspace;


pub use orchestrator::{PipelineContext, PipelineOrchestrator, SelfHosting};
pub use workspace::Workspace;

use crate::services::{FileChange, FileSet, TestFailure, TestOutcome};
use crate::state::BuildResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validate,
    EvaluateComplexity,
    Red,
    Green,
    Refactor,
    ReviewCode,
    RunQualityGates,
    PostValidate,
    CheckCompliance,
    CheckArtifactCompleteness,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 10] = [
        Self::Validate,
        Self::EvaluateComplexity,
        Self::Red,
        Self::Green,
        Self::Refactor,
        Self::ReviewCode,
        Self::RunQualityGates,
        Self::PostValidate,
        Self::CheckCompliance,
        Self::CheckArtifactCompleteness,
    ];

    /// Stages whose failure fails the run and stops it
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::Validate | Self::RunQualityGates | Self::PostValidate | Self::CheckArtifactCompleteness
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::EvaluateComplexity => "evaluate_complexity",
            Self::Red => "red",
            Self::Green => "green",
            Self::Refactor => "refactor",
            Self::ReviewCode => "review_code",
            Self::RunQualityGates => "run_quality_gates",
            Self::PostValidate => "post_validate",
            Self::CheckCompliance => "check_compliance",
            Self::CheckArtifactCompleteness => "check_artifact_completeness",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: PipelineStage,
    pub success: bool,
    pub duration: Duration,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StageResult {
    pub fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            success: true,
            duration: Duration::ZERO,
            data: serde_json::Map::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.errors.push(error.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }
}

/// One pass of the fix loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAttempt {
    pub iteration: usize,
    pub targeted: Vec<TestFailure>,
    pub changes: Vec<FileChange>,
    /// Test outcome after the changes were applied
    pub outcome: TestOutcome,
    pub success: bool,
    /// No change reached the files
    pub no_progress: bool,
    pub error: Option<String>,
}

/// Everything a pipeline run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub unit: String,
    pub stages: Vec<StageResult>,
    /// Final files, tests included
    pub artifact: FileSet,
    pub fix_attempts: Vec<FixAttempt>,
    pub output_dir: Option<PathBuf>,
    pub success: bool,
    pub dry_run: bool,
}

impl PipelineRun {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            unit: unit.into(),
            stages: Vec::new(),
            artifact: FileSet::new(),
            fix_attempts: Vec::new(),
            output_dir: None,
            success: true,
            dry_run: false,
        }
    }

    /// Append a stage result, folding blocking failures into `success`
    pub fn push(&mut self, result: StageResult) -> bool {
        let passed = result.success || !result.stage.is_blocking();
        self.success &= passed;
        self.stages.push(result);
        passed
    }

    pub fn stage(&self, stage: PipelineStage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn errors(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.errors.iter().map(move |e| format!("{}: {}", s.stage, e)))
            .collect()
    }

    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn to_build_result(&self) -> BuildResult {
        BuildResult {
            success: self.success,
            output_files: self.artifact.keys().cloned().collect(),
            errors: self.errors(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_fix_iterations: usize,
    pub max_failures_per_iteration: usize,
    pub collaborator_timeout_secs: u64,
    /// End the fix loop at the first iteration that changes nothing
    pub stop_on_no_progress: bool,
    /// Language of generated code; drives placeholder synthesis
    pub language: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_fix_iterations: 10,
            max_failures_per_iteration: 3,
            collaborator_timeout_secs: 300,
            stop_on_no_progress: false,
            language: "python".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}
