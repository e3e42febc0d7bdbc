//! Splitting oversized recipes into sub-recipes

use super::{ComplexityAnalyzer, ComplexityMetrics, DecompositionStrategy};
use crate::error::Result;
use crate::guard::SelfOverwriteGuard;
use crate::recipe::{
    ComponentMetadata, ComponentSpec, Design, Priority, RecipeRegistry, RecipeUnit, Requirement,
    Requirements,
};
use regex_utils::{keywords, layer};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A generated sub-recipe with its own metrics
#[derive(Debug, Clone, Serialize)]
pub struct DecomposedUnit {
    #[serde(serialize_with = "serialize_unit_name")]
    pub unit: RecipeUnit,
    pub metrics: ComplexityMetrics,
}

fn serialize_unit_name<S: serde::Serializer>(unit: &RecipeUnit, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(unit.name())
}

#[derive(Debug, Clone, Serialize)]
pub struct DecompositionPlan {
    pub parent: String,
    pub strategy: DecompositionStrategy,
    pub sub_units: Vec<DecomposedUnit>,
}

impl DecompositionPlan {
    pub fn names(&self) -> Vec<String> {
        self.sub_units.iter().map(|s| s.unit.name().to_string()).collect()
    }
}

/// Requirements and design fragments destined for one sub-recipe
#[derive(Debug, Default)]
struct Part {
    suffix: String,
    requirements: Vec<Requirement>,
    components: Vec<ComponentSpec>,
    interfaces: Vec<String>,
}

impl Part {
    fn named(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Data,
    Logic,
    Presentation,
}

impl Layer {
    const ALL: [Layer; 3] = [Layer::Data, Layer::Logic, Layer::Presentation];

    fn of(text: &str) -> Self {
        if layer::is_data(text) {
            Layer::Data
        } else if layer::is_presentation(text) {
            Layer::Presentation
        } else {
            Layer::Logic
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Layer::Data => "data",
            Layer::Logic => "logic",
            Layer::Presentation => "presentation",
        }
    }
}

pub struct Decomposer<'a> {
    analyzer: &'a ComplexityAnalyzer,
}

impl<'a> Decomposer<'a> {
    pub fn new(analyzer: &'a ComplexityAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Decompose `unit` if its metrics call for it
    pub fn plan(&self, unit: &RecipeUnit) -> Result<Option<DecompositionPlan>> {
        let metrics = self.analyzer.analyze(unit);
        match metrics.strategy {
            Some(strategy) if metrics.should_decompose => self.decompose(unit, strategy).map(Some),
            _ => Ok(None),
        }
    }

    /// Split `unit` with the given strategy
    ///
    /// A layered split that puts every requirement into one layer falls back
    /// to component grouping (or chunking when there is no design).
    pub fn decompose(&self, unit: &RecipeUnit, strategy: DecompositionStrategy) -> Result<DecompositionPlan> {
        let (strategy, parts) = match strategy {
            DecompositionStrategy::ComponentGrouping if !unit.components().is_empty() => {
                (strategy, group_by_component(unit))
            }
            DecompositionStrategy::ComponentGrouping | DecompositionStrategy::FeatureChunking => {
                (DecompositionStrategy::FeatureChunking, self.chunk_features(unit))
            }
            DecompositionStrategy::LayeredSplit => match split_layers(unit) {
                Some(parts) => (strategy, parts),
                None if !unit.components().is_empty() => {
                    debug!("Layered split of {} found a single layer, grouping by component", unit.name());
                    (DecompositionStrategy::ComponentGrouping, group_by_component(unit))
                }
                None => (DecompositionStrategy::FeatureChunking, self.chunk_features(unit)),
            },
        };

        let sub_units = self.assemble(unit, parts)?;
        info!("Decomposed {} into {} sub-recipes ({})", unit.name(), sub_units.len(), strategy);

        Ok(DecompositionPlan { parent: unit.name().to_string(), strategy, sub_units })
    }

    fn chunk_features(&self, unit: &RecipeUnit) -> Vec<Part> {
        let size = self.analyzer.config().chunk_size();

        unit.requirements
            .requirements
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| Part {
                requirements: chunk.to_vec(),
                ..Part::named(format!("part{}", i + 1))
            })
            .collect()
    }

    fn assemble(&self, parent: &RecipeUnit, mut parts: Vec<Part>) -> Result<Vec<DecomposedUnit>> {
        if let Some(first) = parts.first_mut() {
            first.interfaces = parent.interfaces().to_vec();
        }

        let mut used = BTreeSet::new();
        let mut first_name: Option<String> = None;
        let mut sub_units = Vec::with_capacity(parts.len());

        for part in parts {
            let mut name = format!("{}-{}", parent.name(), part.suffix);
            let mut n = 2;
            while !used.insert(name.clone()) {
                name = format!("{}-{}{}", parent.name(), part.suffix, n);
                n += 1;
            }

            let dependencies = match &first_name {
                None => parent.dependencies().clone(),
                Some(first) => BTreeSet::from([first.clone()]),
            };

            let mut metadata = ComponentMetadata {
                name: name.clone(),
                version: parent.version().to_string(),
                component_type: parent.component_type(),
                dependencies,
                description: format!("{} of {}", part.suffix, parent.name()),
                metadata: Default::default(),
            };
            metadata.metadata.insert("parent".to_string(), serde_json::Value::from(parent.name()));

            let requirements = Requirements {
                purpose: format!("{} ({})", parent.requirements.purpose, part.suffix),
                requirements: part.requirements,
                success_criteria: parent.requirements.success_criteria.clone(),
            };

            let design = parent.design.as_ref().map(|d| Design {
                architecture: d.architecture.clone(),
                components: part.components,
                interfaces: part.interfaces,
                implementation_notes: d.implementation_notes.clone(),
            });

            let unit = RecipeUnit::new(name.clone(), requirements, design, metadata)?;
            let metrics = self.analyzer.evaluate(&unit);
            first_name.get_or_insert(name);
            sub_units.push(DecomposedUnit { unit, metrics });
        }

        Ok(sub_units)
    }
}

/// One part per component; each requirement follows the component sharing the
/// most keywords with it, unmatched requirements go to the first component
fn group_by_component(unit: &RecipeUnit) -> Vec<Part> {
    let components = unit.components();
    let mut parts: Vec<Part> = components
        .iter()
        .map(|c| Part { components: vec![c.clone()], ..Part::named(slug(&c.name)) })
        .collect();

    for requirement in &unit.requirements.requirements {
        let text = requirement_text(requirement);
        let best = components
            .iter()
            .enumerate()
            .map(|(i, c)| (i, keywords::overlap(&text, &component_text(c))))
            .filter(|(_, overlap)| *overlap > 0)
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        parts[best].requirements.push(requirement.clone());
    }

    for part in parts.iter_mut().filter(|p| p.requirements.is_empty()) {
        if let Some(component) = part.components.first() {
            let mut description = format!("Implement the {} component", component.name);
            if !component.description.is_empty() {
                description.push_str(": ");
                description.push_str(&component.description);
            }
            part.requirements.push(Requirement::new(
                format!("{}-impl", part.suffix),
                description,
                Priority::Should,
            ));
        }
    }

    parts
}

/// One part per non-empty architectural layer, or `None` when there is only one
fn split_layers(unit: &RecipeUnit) -> Option<Vec<Part>> {
    let mut parts: Vec<Part> = Layer::ALL.iter().map(|l| Part::named(l.suffix())).collect();
    let slot = |l: Layer| Layer::ALL.iter().position(|x| *x == l).unwrap_or(1);

    for requirement in &unit.requirements.requirements {
        parts[slot(Layer::of(&requirement_text(requirement)))].requirements.push(requirement.clone());
    }

    let populated = parts.iter().filter(|p| !p.requirements.is_empty()).count();
    if populated <= 1 {
        return None;
    }

    for component in unit.components() {
        parts[slot(Layer::of(&component_text(component)))].components.push(component.clone());
    }

    // Components of a layer without requirements follow the logic layer
    let mut orphans = Vec::new();
    for part in parts.iter_mut().filter(|p| p.requirements.is_empty()) {
        orphans.append(&mut part.components);
    }
    parts.retain(|p| !p.requirements.is_empty());
    let target = parts.iter().position(|p| p.suffix == Layer::Logic.suffix()).unwrap_or(0);
    parts[target].components.extend(orphans);

    Some(parts)
}

fn requirement_text(requirement: &Requirement) -> String {
    let mut text = requirement.description.clone();
    for criterion in &requirement.validation_criteria {
        text.push(' ');
        text.push_str(criterion);
    }
    text
}

/// Component name and type with camel case split into words
fn component_text(component: &ComponentSpec) -> String {
    let text = match &component.type_name {
        Some(type_name) => format!("{} {}", component.name, type_name),
        None => component.name.clone(),
    };
    keywords::CAMEL_BOUNDARY.replace_all(&text, "$1 $2").into_owned()
}

/// `CacheStore` -> `cache-store`
fn slug(name: &str) -> String {
    let spaced = keywords::CAMEL_BOUNDARY.replace_all(name, "$1-$2").to_lowercase();
    let mut slug = String::with_capacity(spaced.len());
    for c in spaced.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "component".to_string() } else { slug }
}

/// Write the sub-recipes of `plan` under `recipes_dir`
pub fn write_sub_units(
    plan: &DecompositionPlan,
    recipes_dir: &Path,
    guard: &SelfOverwriteGuard,
) -> Result<Vec<PathBuf>> {
    let root = guard.check(recipes_dir)?;

    plan.sub_units
        .iter()
        .map(|sub| RecipeRegistry::write_unit(&root, &sub.unit))
        .collect()
}
