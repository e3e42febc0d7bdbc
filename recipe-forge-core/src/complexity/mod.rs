//! Complexity scoring and decomposition of oversized recipes

pub mod analyzer;
pub mod decomposer;

pub use analyzer::ComplexityAnalyzer;
pub use decomposer::{DecomposedUnit, DecompositionPlan, Decomposer};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative weight of each sub-score; the weights sum to 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityWeights {
    pub components: f64,
    pub dependencies: f64,
    pub requirements: f64,
    pub interfaces: f64,
    pub cyclomatic: f64,
    pub cognitive: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            components: 0.25,
            dependencies: 0.15,
            requirements: 0.20,
            interfaces: 0.10,
            cyclomatic: 0.15,
            cognitive: 0.15,
        }
    }
}

impl ComplexityWeights {
    pub fn total(&self) -> f64 {
        self.components
            + self.dependencies
            + self.requirements
            + self.interfaces
            + self.cyclomatic
            + self.cognitive
    }
}

/// Raw count at which a sub-score saturates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityScales {
    pub components: f64,
    pub dependencies: f64,
    pub requirements: f64,
    pub interfaces: f64,
    pub cyclomatic: f64,
    pub cognitive: f64,
}

impl Default for ComplexityScales {
    fn default() -> Self {
        Self {
            components: 10.0,
            dependencies: 5.0,
            requirements: 20.0,
            interfaces: 5.0,
            cyclomatic: 50.0,
            cognitive: 30.0,
        }
    }
}

/// Limits above which a recipe should be decomposed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityThresholds {
    pub score: f64,
    pub components: usize,
    pub dependencies: usize,
    pub cyclomatic: usize,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self { score: 70.0, components: 15, dependencies: 10, cyclomatic: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    pub weights: ComplexityWeights,
    pub scales: ComplexityScales,
    pub thresholds: ComplexityThresholds,
}

impl ComplexityConfig {
    /// Number of requirements per sub-unit when chunking a recipe without a design
    pub fn chunk_size(&self) -> usize {
        (self.thresholds.components / 2).max(1)
    }
}

/// How an oversized recipe gets split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecompositionStrategy {
    ComponentGrouping,
    FeatureChunking,
    LayeredSplit,
}

impl fmt::Display for DecompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComponentGrouping => write!(f, "component-grouping"),
            Self::FeatureChunking => write!(f, "feature-chunking"),
            Self::LayeredSplit => write!(f, "layered-split"),
        }
    }
}

/// Derived size and complexity figures of one recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    pub functional_requirements: usize,
    pub non_functional_requirements: usize,
    pub components: usize,
    pub methods: usize,
    pub dependencies: usize,
    pub interfaces: usize,
    pub validation_criteria: usize,
    pub estimated_lines: usize,
    pub cyclomatic: usize,
    pub cognitive: usize,
    /// Weighted score in [0, 100]
    pub score: f64,
    pub should_decompose: bool,
    pub strategy: Option<DecompositionStrategy>,
    pub reasons: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ComplexityMetrics {
    pub fn requirements(&self) -> usize {
        self.functional_requirements + self.non_functional_requirements
    }
}

fn sub_score(raw: usize, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 10.0;
    }
    (raw as f64 / scale).min(1.0) * 10.0
}

/// Raw counts that feed the score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplexityInputs {
    pub functional_requirements: usize,
    pub non_functional_requirements: usize,
    pub components: usize,
    pub methods: usize,
    pub dependencies: usize,
    pub interfaces: usize,
    pub validation_criteria: usize,
}

impl ComplexityInputs {
    pub fn of(unit: &crate::recipe::RecipeUnit) -> Self {
        Self {
            functional_requirements: unit.requirements.functional_count(),
            non_functional_requirements: unit.requirements.non_functional_count(),
            components: unit.components().len(),
            methods: unit.design.as_ref().map(|d| d.method_count()).unwrap_or(0),
            dependencies: unit.dependencies().len(),
            interfaces: unit.interfaces().len(),
            validation_criteria: unit
                .requirements
                .requirements
                .iter()
                .map(|r| r.validation_criteria.len())
                .sum(),
        }
    }

    fn requirements(&self) -> usize {
        self.functional_requirements + self.non_functional_requirements
    }

    pub fn cyclomatic(&self) -> usize {
        self.components + self.methods + self.interfaces + self.validation_criteria
    }

    pub fn cognitive(&self) -> usize {
        self.requirements() + 2 * self.components + self.dependencies + self.interfaces
    }

    pub fn estimated_lines(&self) -> usize {
        50 * self.components + 15 * self.methods + 20 * self.requirements()
    }

    /// Score these counts under `config`
    pub fn evaluate(&self, config: &ComplexityConfig) -> ComplexityMetrics {
        let w = &config.weights;
        let s = &config.scales;
        let t = &config.thresholds;

        let cyclomatic = self.cyclomatic();
        let cognitive = self.cognitive();

        let weighted = w.components * sub_score(self.components, s.components)
            + w.dependencies * sub_score(self.dependencies, s.dependencies)
            + w.requirements * sub_score(self.requirements(), s.requirements)
            + w.interfaces * sub_score(self.interfaces, s.interfaces)
            + w.cyclomatic * sub_score(cyclomatic, s.cyclomatic)
            + w.cognitive * sub_score(cognitive, s.cognitive);
        let score = (weighted * 10.0).clamp(0.0, 100.0);

        let mut reasons = Vec::new();
        if score > t.score {
            reasons.push(format!("score {:.1} exceeds {:.1}", score, t.score));
        }
        if self.components > t.components {
            reasons.push(format!("{} components exceed {}", self.components, t.components));
        }
        if self.dependencies > t.dependencies {
            reasons.push(format!("{} dependencies exceed {}", self.dependencies, t.dependencies));
        }
        if cyclomatic > t.cyclomatic {
            reasons.push(format!("cyclomatic complexity {} exceeds {}", cyclomatic, t.cyclomatic));
        }

        let should_decompose = !reasons.is_empty();
        let strategy = should_decompose.then(|| {
            if self.components == 0 {
                DecompositionStrategy::FeatureChunking
            } else if self.components > t.components {
                DecompositionStrategy::ComponentGrouping
            } else {
                DecompositionStrategy::LayeredSplit
            }
        });

        let mut suggestions = Vec::new();
        match strategy {
            Some(DecompositionStrategy::ComponentGrouping) => suggestions
                .push(format!("Split into one sub-recipe per component ({} components)", self.components)),
            Some(DecompositionStrategy::FeatureChunking) => suggestions.push(format!(
                "Split the {} requirements into chunks of {}",
                self.requirements(),
                config.chunk_size()
            )),
            Some(DecompositionStrategy::LayeredSplit) => {
                suggestions.push("Separate data, logic and presentation concerns".to_string())
            }
            None => {}
        }
        if self.dependencies > t.dependencies {
            suggestions.push("Introduce a facade recipe to reduce direct dependencies".to_string());
        }
        if self.interfaces > s.interfaces as usize {
            suggestions.push("Group related interfaces behind fewer entry points".to_string());
        }

        ComplexityMetrics {
            functional_requirements: self.functional_requirements,
            non_functional_requirements: self.non_functional_requirements,
            components: self.components,
            methods: self.methods,
            dependencies: self.dependencies,
            interfaces: self.interfaces,
            validation_criteria: self.validation_criteria,
            estimated_lines: self.estimated_lines(),
            cyclomatic,
            cognitive,
            score,
            should_decompose,
            strategy,
            reasons,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inputs(components: usize, requirements: usize, interfaces: usize, methods: usize) -> ComplexityInputs {
        ComplexityInputs {
            functional_requirements: requirements,
            components,
            methods,
            interfaces,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((ComplexityWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_proxies_and_estimates() {
        let i = ComplexityInputs {
            functional_requirements: 3,
            non_functional_requirements: 1,
            components: 2,
            methods: 5,
            dependencies: 1,
            interfaces: 2,
            validation_criteria: 4,
        };

        assert_eq!(i.cyclomatic(), 2 + 5 + 2 + 4);
        assert_eq!(i.cognitive(), 4 + 4 + 1 + 2);
        assert_eq!(i.estimated_lines(), 100 + 75 + 80);
    }

    #[test]
    fn test_small_unit_is_not_decomposed() {
        let metrics = inputs(2, 3, 1, 4).evaluate(&ComplexityConfig::default());

        assert!(!metrics.should_decompose);
        assert!(metrics.strategy.is_none());
        assert!(metrics.score < 70.0);
    }

    #[test]
    fn test_sixteen_components_use_component_grouping() {
        let metrics = inputs(16, 20, 3, 11).evaluate(&ComplexityConfig::default());

        assert!((metrics.score - 75.0).abs() < 1e-9);
        assert!(metrics.should_decompose);
        assert_eq!(metrics.strategy, Some(DecompositionStrategy::ComponentGrouping));
        assert_eq!(metrics.reasons.len(), 2);
    }

    #[test]
    fn test_requirements_without_design_use_feature_chunking() {
        let metrics = inputs(0, 40, 0, 0).evaluate(&ComplexityConfig {
            thresholds: ComplexityThresholds { score: 10.0, ..Default::default() },
            ..Default::default()
        });

        assert_eq!(metrics.strategy, Some(DecompositionStrategy::FeatureChunking));
    }

    #[test]
    fn test_many_dependencies_use_layered_split() {
        let i = ComplexityInputs { dependencies: 12, components: 3, functional_requirements: 5, ..Default::default() };
        let metrics = i.evaluate(&ComplexityConfig::default());

        assert!(metrics.should_decompose);
        assert_eq!(metrics.strategy, Some(DecompositionStrategy::LayeredSplit));
    }

    #[test]
    fn test_score_saturates_at_hundred() {
        let saturated = ComplexityInputs {
            functional_requirements: 500,
            non_functional_requirements: 500,
            components: 500,
            methods: 500,
            dependencies: 500,
            interfaces: 500,
            validation_criteria: 500,
        };
        let metrics = saturated.evaluate(&ComplexityConfig::default());
        assert!((metrics.score - 100.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_score_monotone_in_each_count(
            base in prop::array::uniform7(0usize..40),
            field in 0usize..7,
            bump in 1usize..20,
        ) {
            let make = |v: [usize; 7]| ComplexityInputs {
                functional_requirements: v[0],
                non_functional_requirements: v[1],
                components: v[2],
                methods: v[3],
                dependencies: v[4],
                interfaces: v[5],
                validation_criteria: v[6],
            };
            let mut bumped = base;
            bumped[field] += bump;

            let config = ComplexityConfig::default();
            let before = make(base).evaluate(&config).score;
            let after = make(bumped).evaluate(&config).score;
            prop_assert!(after + 1e-9 >= before);
        }
    }
}
