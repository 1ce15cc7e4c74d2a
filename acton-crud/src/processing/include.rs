//! Eager-load directives
//!
//! Repositories carry a mandatory include set; callers may only add to it.
//! Any include at all switches the fetch to split-query mode.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::SpecificationError;
use crate::entity::TypeRegistry;

/// Ordered, de-duplicated set of dotted relation paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncludeSet(BTreeSet<String>);

impl IncludeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.0.insert(trimmed.to_string())
    }

    #[must_use]
    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.insert(path);
        self
    }

    /// Union of `self` and `other`; nothing is ever removed
    #[must_use]
    pub fn merged(&self, other: &IncludeSet) -> IncludeSet {
        IncludeSet(self.0.union(&other.0).cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether the fetch must run as one query per relation
    pub fn requires_split_query(&self) -> bool {
        !self.is_empty()
    }

    /// Check every path against `root` and rewrite it with declared names
    ///
    /// Each segment must be a reference or collection field of the type
    /// reached so far.
    ///
    /// # Errors
    ///
    /// [`SpecificationError::InvalidInclude`] for the first path that does not
    /// walk relations only.
    pub fn resolve(&self, root: &str, registry: &TypeRegistry) -> Result<IncludeSet, SpecificationError> {
        if !registry.contains(root) {
            return Err(SpecificationError::UnknownType(root.to_string()));
        }

        let mut resolved = IncludeSet::new();
        for path in self.iter() {
            let mut current = root;
            let mut segments = Vec::new();
            for segment in path.split('.') {
                let target = registry
                    .field(current, segment.trim())
                    .and_then(|field| field.kind.related_type().map(|t| (field.name, t)));
                let Some((name, target)) = target else {
                    return Err(SpecificationError::InvalidInclude(path.to_string()));
                };
                segments.push(name);
                current = target;
            }
            resolved.insert(segments.join("."));
        }
        Ok(resolved)
    }
}

impl<S: Into<String>> FromIterator<S> for IncludeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = IncludeSet::new();
        for path in iter {
            set.insert(path);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::registry;

    #[test]
    fn test_merge_is_additive() {
        let required: IncludeSet = ["location"].into_iter().collect();
        let caller: IncludeSet = ["readings", "location"].into_iter().collect();
        let merged = required.merged(&caller);
        assert_eq!(merged.iter().collect::<Vec<_>>(), vec!["location", "readings"]);
        assert!(merged.requires_split_query());
        assert!(!IncludeSet::new().requires_split_query());
        assert!(!IncludeSet::new().with("  ").requires_split_query());
    }

    #[test]
    fn test_resolve_rewrites_declared_names() {
        let includes: IncludeSet = ["Location", "READINGS"].into_iter().collect();
        let resolved = includes.resolve("Sensor", &registry()).unwrap();
        assert!(resolved.contains("location"));
        assert!(resolved.contains("readings"));
    }

    #[test]
    fn test_resolve_rejects_scalar_and_unknown_paths() {
        let registry = registry();
        let scalar: IncludeSet = ["name"].into_iter().collect();
        assert_eq!(
            scalar.resolve("Device", &registry),
            Err(SpecificationError::InvalidInclude("name".into()))
        );
        let nested_scalar: IncludeSet = ["location.city"].into_iter().collect();
        assert!(nested_scalar.resolve("Device", &registry).is_err());
    }
}
