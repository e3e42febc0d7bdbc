//! Content checksum of a recipe

use crate::recipe::{ComponentType, Priority, RecipeUnit};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

#[derive(Serialize)]
struct Projection<'a> {
    version: &'a str,
    component_type: ComponentType,
    dependencies: &'a BTreeSet<String>,
    requirements: Vec<(&'a str, &'a str, Priority)>,
    components: Vec<(&'a str, &'a str)>,
}

/// SHA-256 over the stable content of a recipe
///
/// Only modelled fields take part; file timestamps and the free-form metadata
/// map do not, so the value is identical for identical content.
pub fn checksum(unit: &RecipeUnit) -> String {
    let projection = Projection {
        version: unit.version(),
        component_type: unit.component_type(),
        dependencies: unit.dependencies(),
        requirements: unit
            .requirements
            .requirements
            .iter()
            .map(|r| (r.id.as_str(), r.description.as_str(), r.priority))
            .collect(),
        components: unit.components().iter().map(|c| (c.name.as_str(), c.description.as_str())).collect(),
    };

    let mut hasher = Sha256::new();
    hasher.update(unit.name().as_bytes());
    hasher.update([0u8]);
    // Serializing plain tuples, strings and sets cannot fail
    if let Ok(bytes) = serde_json::to_vec(&projection) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}
