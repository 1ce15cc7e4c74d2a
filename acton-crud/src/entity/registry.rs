//! Explicit registry of entity type descriptors
//!
//! Every type a filter can name (as a root, as `cast_to_type`, as an `IsType`
//! target, or through a navigation) is registered once at startup. Field
//! lookup is case-insensitive and walks the parent chain, so subtypes see
//! the fields of the types they extend.
//!
//! # Example
//!
//! ```rust
//! use acton_crud::entity::{FieldDef, FieldKind, TypeDescriptor, TypeRegistry};
//!
//! let registry = TypeRegistry::builder()
//!     .register(
//!         TypeDescriptor::new("Animal")
//!             .field(FieldDef::new("id", FieldKind::Integer))
//!             .field(FieldDef::new("name", FieldKind::Text)),
//!     )
//!     .register(
//!         TypeDescriptor::new("Dog")
//!             .extends("Animal")
//!             .field(FieldDef::new("breed", FieldKind::Text)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.is_a("Dog", "Animal"));
//! assert_eq!(registry.field("Dog", "NAME").map(|f| f.name), Some("name"));
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::processing::SpecificationError;

/// Storage kind of a field, which decides what filters and sorts it supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
    Uuid,
    /// Closed set of member names, ordered by position
    Enum(&'static [&'static str]),
    Bytes,
    Json,
    /// To-one navigation to the named type
    Reference(&'static str),
    /// To-many relation to the named type, usable only as an include
    Collection(&'static str),
}

impl FieldKind {
    /// Whether values of this kind have a total order usable by comparisons and sorts
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Self::Integer
                | Self::Float
                | Self::Boolean
                | Self::Text
                | Self::Timestamp
                | Self::Uuid
                | Self::Enum(_)
        )
    }

    /// Plain value column, as opposed to a document or a relation
    pub fn is_scalar(&self) -> bool {
        self.is_ordered() || matches!(self, Self::Bytes)
    }

    /// Whether a filter value string can be turned into a value of this kind
    pub fn is_parsable(&self) -> bool {
        self.is_ordered()
    }

    /// Whether `Contains` can run against the textual form of this kind
    pub fn is_textual(&self) -> bool {
        !matches!(self, Self::Collection(_))
    }

    /// Target type of a navigation or relation field
    pub fn related_type(&self) -> Option<&'static str> {
        match self {
            Self::Reference(target) | Self::Collection(target) => Some(target),
            _ => None,
        }
    }

    /// Position of `member` in an enumeration kind
    pub fn enum_position(&self, member: &str) -> Option<usize> {
        match self {
            Self::Enum(members) => members.iter().position(|m| *m == member),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::Text => write!(f, "text"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Uuid => write!(f, "uuid"),
            Self::Enum(_) => write!(f, "enum"),
            Self::Bytes => write!(f, "bytes"),
            Self::Json => write!(f, "json"),
            Self::Reference(target) => write!(f, "reference<{target}>"),
            Self::Collection(target) => write!(f, "collection<{target}>"),
        }
    }
}

/// A declared field of a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Declared name, as matched by [`Record::field`](super::Record::field)
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    /// A non-nullable field
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    /// Mark the field as nullable
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Name, parent and fields of one registered type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: &'static str,
    parent: Option<&'static str>,
    fields: Vec<FieldDef>,
}

impl TypeDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            parent: None,
            fields: Vec::new(),
        }
    }

    /// Inherit the fields of `parent`; subtypes also satisfy `IsType` on the parent
    #[must_use]
    pub fn extends(mut self, parent: &'static str) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static str> {
        self.parent
    }

    /// Fields declared directly on this type (not inherited)
    pub fn own_fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn own_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Builder validating descriptors before they become a [`TypeRegistry`]
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    descriptors: Vec<TypeDescriptor>,
}

impl TypeRegistryBuilder {
    #[must_use]
    pub fn register(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Register every descriptor an entity declares (its root type and subtypes)
    #[must_use]
    pub fn entity<E: super::Entity>(mut self) -> Self {
        self.descriptors.extend(E::descriptors());
        self
    }

    /// Validate names, parents and relation targets
    ///
    /// # Errors
    ///
    /// Fails on duplicate type names, unknown parents or relation targets,
    /// and inheritance cycles.
    pub fn build(self) -> Result<TypeRegistry, SpecificationError> {
        let mut types = HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            let name = descriptor.name;
            if types.insert(name, descriptor).is_some() {
                return Err(SpecificationError::DuplicateType(name.to_string()));
            }
        }

        for descriptor in types.values() {
            if let Some(parent) = descriptor.parent {
                if !types.contains_key(parent) {
                    return Err(SpecificationError::UnknownParent {
                        type_name: descriptor.name.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }
            for field in &descriptor.fields {
                if let Some(target) = field.kind.related_type() {
                    if !types.contains_key(target) {
                        return Err(SpecificationError::UnknownType(target.to_string()));
                    }
                }
            }
        }

        for descriptor in types.values() {
            let mut current = descriptor.parent;
            let mut steps = 0;
            while let Some(parent) = current {
                steps += 1;
                if parent == descriptor.name || steps > types.len() {
                    return Err(SpecificationError::InheritanceCycle(
                        descriptor.name.to_string(),
                    ));
                }
                current = types.get(parent).and_then(|d| d.parent);
            }
        }

        Ok(TypeRegistry { types })
    }
}

/// Immutable set of known types, shared by repositories behind an `Arc`
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<&'static str, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Descriptor registered under exactly `name`
    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Iterate `name` and its ancestors, nearest first
    pub fn lineage<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a TypeDescriptor> + 'a {
        let start = self.types.get(name);
        std::iter::successors(start, move |d| d.parent.and_then(|p| self.types.get(p)))
    }

    /// Whether `type_name` is `ancestor` or extends it
    pub fn is_a(&self, type_name: &str, ancestor: &str) -> bool {
        self.lineage(type_name).any(|d| d.name == ancestor)
    }

    /// `name` plus every registered type that extends it
    pub fn with_descendants(&self, name: &str) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .types
            .keys()
            .copied()
            .filter(|candidate| self.is_a(candidate, name))
            .collect();
        names.sort_unstable();
        names
    }

    /// Case-insensitive field lookup on `type_name`, including inherited fields
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.lineage(type_name)
            .find_map(|descriptor| descriptor.own_field(field_name))
    }

    /// Declared names of the scalar fields of `type_name`, inherited ones included
    pub fn scalar_fields(&self, type_name: &str) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for descriptor in self.lineage(type_name) {
            for field in descriptor.own_fields() {
                if field.kind.is_scalar() && !names.contains(&field.name) {
                    names.push(field.name);
                }
            }
        }
        names
    }

    /// Resolve a dotted path starting at `root`
    ///
    /// All segments except the last must be to-one references. The returned
    /// path holds the declared field names.
    ///
    /// # Errors
    ///
    /// [`SpecificationError::UnknownField`] when a segment does not exist,
    /// [`SpecificationError::NotNavigable`] when an intermediate segment is not
    /// a reference.
    pub fn resolve_path(&self, root: &str, path: &str) -> Result<ResolvedPath, SpecificationError> {
        if !self.contains(root) {
            return Err(SpecificationError::UnknownType(root.to_string()));
        }

        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let mut current = root.to_string();
        let mut resolved = Vec::with_capacity(segments.len());
        let mut last = None;

        for (index, segment) in segments.iter().enumerate() {
            let field = self
                .field(&current, segment)
                .copied()
                .filter(|_| !segment.is_empty())
                .ok_or_else(|| SpecificationError::UnknownField {
                    type_name: current.clone(),
                    path: path.to_string(),
                })?;

            if index + 1 < segments.len() {
                match field.kind {
                    FieldKind::Reference(target) => current = target.to_string(),
                    _ => {
                        return Err(SpecificationError::NotNavigable {
                            type_name: current,
                            segment: field.name.to_string(),
                        })
                    }
                }
            }

            resolved.push(field.name);
            last = Some(field);
        }

        let field = last.ok_or_else(|| SpecificationError::UnknownField {
            type_name: root.to_string(),
            path: path.to_string(),
        })?;

        Ok(ResolvedPath {
            segments: resolved,
            field,
        })
    }
}

/// A dotted field path checked against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Declared field names, navigation first
    pub segments: Vec<&'static str>,
    /// Definition of the final field
    pub field: FieldDef,
}

impl ResolvedPath {
    /// Dotted form using declared names
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::builder()
            .register(
                TypeDescriptor::new("Site")
                    .field(FieldDef::new("id", FieldKind::Integer))
                    .field(FieldDef::new("city", FieldKind::Text)),
            )
            .register(
                TypeDescriptor::new("Asset")
                    .field(FieldDef::new("id", FieldKind::Integer))
                    .field(FieldDef::new("site", FieldKind::Reference("Site")).nullable()),
            )
            .register(
                TypeDescriptor::new("Pump")
                    .extends("Asset")
                    .field(FieldDef::new("flowRate", FieldKind::Float)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_field_lookup_is_case_insensitive_and_inherited() {
        let registry = registry();
        assert_eq!(registry.field("Pump", "FLOWRATE").map(|f| f.name), Some("flowRate"));
        assert_eq!(registry.field("Pump", "Id").map(|f| f.name), Some("id"));
        assert!(registry.field("Asset", "flowRate").is_none());
    }

    #[test]
    fn test_scalar_fields_skip_relations() {
        let registry = registry();
        assert_eq!(registry.scalar_fields("Pump"), vec!["flowRate", "id"]);
        assert_eq!(registry.scalar_fields("Asset"), vec!["id"]);
        assert!(registry.scalar_fields("Unknown").is_empty());
    }

    #[test]
    fn test_is_a_follows_parent_chain() {
        let registry = registry();
        assert!(registry.is_a("Pump", "Asset"));
        assert!(registry.is_a("Asset", "Asset"));
        assert!(!registry.is_a("Asset", "Pump"));
        assert!(!registry.is_a("Missing", "Asset"));
        assert_eq!(registry.with_descendants("Asset"), vec!["Asset", "Pump"]);
    }

    #[test]
    fn test_resolve_nested_path() {
        let resolved = registry().resolve_path("Pump", "Site.City").unwrap();
        assert_eq!(resolved.segments, vec!["site", "city"]);
        assert_eq!(resolved.field.kind, FieldKind::Text);
        assert_eq!(resolved.dotted(), "site.city");
    }

    #[test]
    fn test_resolve_rejects_unknown_and_non_navigable_segments() {
        let registry = registry();
        assert!(matches!(
            registry.resolve_path("Asset", "site.country"),
            Err(SpecificationError::UnknownField { .. })
        ));
        assert!(matches!(
            registry.resolve_path("Asset", "id.value"),
            Err(SpecificationError::NotNavigable { .. })
        ));
        assert!(matches!(
            registry.resolve_path("Asset", ""),
            Err(SpecificationError::UnknownField { .. })
        ));
        assert!(matches!(
            registry.resolve_path("Nope", "id"),
            Err(SpecificationError::UnknownType(_))
        ));
    }

    #[test]
    fn test_builder_rejects_unknown_parent_and_duplicates() {
        let unknown_parent = TypeRegistry::builder()
            .register(TypeDescriptor::new("Child").extends("Ghost"))
            .build();
        assert!(matches!(
            unknown_parent,
            Err(SpecificationError::UnknownParent { .. })
        ));

        let duplicate = TypeRegistry::builder()
            .register(TypeDescriptor::new("Twice"))
            .register(TypeDescriptor::new("Twice"))
            .build();
        assert_eq!(
            duplicate.unwrap_err(),
            SpecificationError::DuplicateType("Twice".into())
        );
    }

    #[test]
    fn test_builder_rejects_inheritance_cycle() {
        let cycle = TypeRegistry::builder()
            .register(TypeDescriptor::new("A").extends("B"))
            .register(TypeDescriptor::new("B").extends("A"))
            .build();
        assert!(matches!(cycle, Err(SpecificationError::InheritanceCycle(_))));
    }
}
