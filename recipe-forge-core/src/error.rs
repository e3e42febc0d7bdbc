//! Error taxonomy shared across the build orchestrator

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or validating the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Circular dependency detected: {}", format_cycles(.cycles))]
    CycleDetected { cycles: Vec<Vec<String>> },

    #[error("Missing dependencies: {}", format_missing(.missing))]
    MissingDependency { missing: Vec<(String, String)> },

    #[error("Node '{0}' is not registered in the dependency graph")]
    MissingNode(String),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles.iter().map(|cycle| cycle.join(" -> ")).collect::<Vec<_>>().join("; ")
}

fn format_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(unit, dependency)| format!("{} requires '{}'", unit, dependency))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main error type for the orchestrator core
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Structural error in recipe '{unit}': {message}")]
    Structural { unit: String, message: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Collaborator '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Refusing to write into '{output}': it overlaps the orchestrator source tree '{source_root}'")]
    SelfOverwrite { output: PathBuf, source_root: PathBuf },

    #[error("Self-overwrite was not confirmed")]
    OverwriteNotConfirmed,

    #[error("Persistence error for '{key}': {message}")]
    Persistence { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recipe '{0}' not found")]
    RecipeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ForgeError {
    pub fn structural(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structural { unit: unit.into(), message: message.into() }
    }

    pub fn persistence(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence { key: key.into(), message: message.into() }
    }

    /// Whether a collaborator may be retried after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Generation(_) | Self::Timeout { .. } | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_every_cycle() {
        let err = GraphError::CycleDetected {
            cycles: vec![
                vec!["a".to_string(), "b".to_string(), "a".to_string()],
                vec!["c".to_string(), "c".to_string()],
            ],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a; c -> c");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ForgeError::Generation("bad output".into()).is_retryable());
        assert!(!ForgeError::Validation("missing name".into()).is_retryable());
        assert!(!ForgeError::from(GraphError::MissingNode("x".into())).is_retryable());
    }
}
