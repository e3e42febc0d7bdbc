//! Cached complexity analysis

use super::{ComplexityConfig, ComplexityInputs, ComplexityMetrics};
use crate::recipe::RecipeUnit;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

struct CachedMetrics {
    inputs: ComplexityInputs,
    metrics: Arc<ComplexityMetrics>,
}

/// Scores recipes, remembering the result per recipe until its counts change
pub struct ComplexityAnalyzer {
    config: ComplexityConfig,
    cache: DashMap<String, CachedMetrics>,
}

impl ComplexityAnalyzer {
    pub fn new(config: ComplexityConfig) -> Self {
        Self { config, cache: DashMap::new() }
    }

    pub fn config(&self) -> &ComplexityConfig {
        &self.config
    }

    /// Metrics for `unit`, recomputed whenever any count feeding the score changes
    pub fn analyze(&self, unit: &RecipeUnit) -> Arc<ComplexityMetrics> {
        let inputs = ComplexityInputs::of(unit);

        if let Some(cached) = self.cache.get(unit.name()) {
            if cached.inputs == inputs {
                return cached.metrics.clone();
            }
        }

        let metrics = Arc::new(inputs.evaluate(&self.config));
        debug!(
            "Complexity of {}: score {:.1}, decompose: {}",
            unit.name(),
            metrics.score,
            metrics.should_decompose
        );

        self.cache.insert(
            unit.name().to_string(),
            CachedMetrics { inputs, metrics: metrics.clone() },
        );
        metrics
    }

    /// Uncached evaluation
    pub fn evaluate(&self, unit: &RecipeUnit) -> ComplexityMetrics {
        ComplexityInputs::of(unit).evaluate(&self.config)
    }

    pub fn invalidate(&self, name: &str) {
        self.cache.remove(name);
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new(ComplexityConfig::default())
    }
}
