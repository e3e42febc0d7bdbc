//! Recipe data model
//!
//! A recipe is a named unit of work: what to build (requirements), how it is
//! shaped (design) and what it depends on (metadata). Recipes are loaded from
//! a registry directory and are immutable once constructed.

pub mod registry;

pub use registry::{RecipeRegistry, RecipeFiles};

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Requirement priority (MoSCoW)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Must,
    Should,
    Could,
    Wont,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Must => write!(f, "MUST"),
            Self::Should => write!(f, "SHOULD"),
            Self::Could => write!(f, "COULD"),
            Self::Wont => write!(f, "WONT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    #[default]
    Functional,
    NonFunctional,
}

/// A single requirement of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub kind: RequirementKind,
    #[serde(default)]
    pub validation_criteria: Vec<String>,
    #[serde(default)]
    pub implemented: bool,
}

impl Requirement {
    pub fn new(id: impl Into<String>, description: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority,
            kind: RequirementKind::Functional,
            validation_criteria: Vec::new(),
            implemented: false,
        }
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.validation_criteria = criteria;
        self
    }

    pub fn non_functional(mut self) -> Self {
        self.kind = RequirementKind::NonFunctional;
        self
    }
}

/// Purpose, requirement list and success criteria of a recipe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

impl Requirements {
    pub fn functional_count(&self) -> usize {
        self.requirements.iter().filter(|r| r.kind == RequirementKind::Functional).count()
    }

    pub fn non_functional_count(&self) -> usize {
        self.requirements.iter().filter(|r| r.kind == RequirementKind::NonFunctional).count()
    }

    pub fn by_priority(&self, priority: Priority) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter().filter(move |r| r.priority == priority)
    }
}

/// Design of one component within a recipe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub implementation_notes: Vec<String>,
}

impl Design {
    pub fn method_count(&self) -> usize {
        self.components.iter().map(|c| c.methods.len()).sum()
    }
}

/// Kind of component a recipe produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Service,
    Agent,
    Library,
    Tool,
    Core,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Agent => write!(f, "agent"),
            Self::Library => write!(f, "library"),
            Self::Tool => write!(f, "tool"),
            Self::Core => write!(f, "core"),
        }
    }
}

/// Metadata descriptor of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ComponentMetadata {
    pub fn new(name: impl Into<String>, component_type: ComponentType) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            component_type,
            dependencies: BTreeSet::new(),
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// A named unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeUnit {
    name: String,
    pub requirements: Requirements,
    pub design: Option<Design>,
    metadata: ComponentMetadata,
}

impl RecipeUnit {
    /// Create a recipe, checking that the metadata describes the same unit
    pub fn new(
        name: impl Into<String>,
        requirements: Requirements,
        design: Option<Design>,
        metadata: ComponentMetadata,
    ) -> Result<Self> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(ForgeError::structural(name, "recipe name is empty"));
        }

        if metadata.name != name {
            return Err(ForgeError::structural(
                name.clone(),
                format!("metadata name '{}' does not match recipe name '{}'", metadata.name, name),
            ));
        }

        if metadata.dependencies.contains(&name) {
            return Err(ForgeError::structural(name, "recipe lists itself as a dependency"));
        }

        Ok(Self { name, requirements, design, metadata })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &ComponentMetadata {
        &self.metadata
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.metadata.dependencies
    }

    pub fn component_type(&self) -> ComponentType {
        self.metadata.component_type
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn components(&self) -> &[ComponentSpec] {
        self.design.as_ref().map(|d| d.components.as_slice()).unwrap_or(&[])
    }

    pub fn interfaces(&self) -> &[String] {
        self.design.as_ref().map(|d| d.interfaces.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Recipe with one requirement and the given dependencies
    pub fn unit(name: &str, deps: &[&str]) -> RecipeUnit {
        let requirements = Requirements {
            purpose: format!("Provide {}", name),
            requirements: vec![Requirement::new(
                format!("{}-R1", name),
                format!("The {} unit must work", name),
                Priority::Must,
            )],
            success_criteria: vec!["All tests pass".to_string()],
        };
        let metadata = ComponentMetadata::new(name, ComponentType::Library)
            .with_dependencies(deps.iter().copied());

        RecipeUnit::new(name, requirements, None, metadata).unwrap()
    }

    /// Recipe with a design containing `components` components
    pub fn designed_unit(name: &str, components: usize, requirements: usize) -> RecipeUnit {
        let reqs = (0..requirements)
            .map(|i| Requirement::new(format!("R{}", i), format!("Requirement number {}", i), Priority::Should))
            .collect();
        let design = Design {
            architecture: "layered".to_string(),
            components: (0..components)
                .map(|i| ComponentSpec::new(format!("Component{}", i), "generated component"))
                .collect(),
            interfaces: Vec::new(),
            implementation_notes: Vec::new(),
        };

        RecipeUnit::new(
            name,
            Requirements { purpose: String::new(), requirements: reqs, success_criteria: Vec::new() },
            Some(design),
            ComponentMetadata::new(name, ComponentType::Service),
        )
        .unwrap()
    }
}
