//! Sort parameters and their resolution into an [`OrderBy`]

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::SpecificationError;
use crate::entity::{compare_values, FieldKind, Record, TypeRegistry, Value, ID_KEY};

/// Direction of a [`SortParam`]
///
/// `""` and `"None"` select the default ordering (primary key, descending).
/// Unknown names fail with [`SpecificationError::UnknownDirection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SortDirection {
    #[default]
    None,
    Ascending,
    Descending,
}

impl SortDirection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Ascending => "Ascending",
            Self::Descending => "Descending",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = SpecificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "None" => Ok(Self::None),
            "Ascending" => Ok(Self::Ascending),
            "Descending" => Ok(Self::Descending),
            other => Err(SpecificationError::UnknownDirection(other.to_string())),
        }
    }
}

impl TryFrom<String> for SortDirection {
    type Error = SpecificationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SortDirection> for String {
    fn from(direction: SortDirection) -> Self {
        direction.as_str().to_string()
    }
}

/// Declarative ordering on a single column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParam {
    #[serde(default)]
    pub column_name: String,
    #[serde(default, rename = "sort_option_name")]
    pub direction: SortDirection,
}

impl SortParam {
    pub fn new(column_name: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column_name: column_name.into(),
            direction,
        }
    }

    pub fn ascending(column_name: impl Into<String>) -> Self {
        Self::new(column_name, SortDirection::Ascending)
    }

    pub fn descending(column_name: impl Into<String>) -> Self {
        Self::new(column_name, SortDirection::Descending)
    }
}

/// Direction of a resolved ordering
///
/// # Example
///
/// ```rust
/// use acton_crud::processing::OrderDirection;
///
/// assert_eq!(format!("{}", OrderDirection::Ascending), "asc");
/// assert_eq!(format!("{}", OrderDirection::Descending), "desc");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// A resolved single-field ordering
///
/// The default orders by primary key, descending. Sorting with
/// [`OrderBy::sort`] is stable and puts nulls first when ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: &'static str,
    pub kind: FieldKind,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub const fn new(field: &'static str, kind: FieldKind, direction: OrderDirection) -> Self {
        Self {
            field,
            kind,
            direction,
        }
    }

    pub const fn id_descending() -> Self {
        Self::new(ID_KEY, FieldKind::Integer, OrderDirection::Descending)
    }

    pub const fn id_ascending() -> Self {
        Self::new(ID_KEY, FieldKind::Integer, OrderDirection::Ascending)
    }

    pub fn compare(&self, left: &dyn Record, right: &dyn Record) -> Ordering {
        let l = left.field(self.field).unwrap_or(Value::Null);
        let r = right.field(self.field).unwrap_or(Value::Null);
        let ordering = compare_values(&l, &r, &self.kind);
        match self.direction {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        }
    }

    /// Stable in-place sort
    pub fn sort<R: Record>(&self, rows: &mut [R]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }
}

impl Default for OrderBy {
    fn default() -> Self {
        Self::id_descending()
    }
}

/// Resolve a sort parameter against the `root` type
///
/// An empty column or [`SortDirection::None`] yields [`OrderBy::default`].
/// The column must be a single field; dotted paths are not followed.
///
/// # Errors
///
/// [`SpecificationError::UnknownField`] when the column is not a field of
/// `root`, [`SpecificationError::UnsupportedFieldKind`] when it has no order.
pub fn resolve(
    param: &SortParam,
    root: &str,
    registry: &TypeRegistry,
) -> Result<OrderBy, SpecificationError> {
    let column = param.column_name.trim();
    let direction = match param.direction {
        SortDirection::None => return Ok(OrderBy::default()),
        _ if column.is_empty() => return Ok(OrderBy::default()),
        SortDirection::Ascending => OrderDirection::Ascending,
        SortDirection::Descending => OrderDirection::Descending,
    };

    if !registry.contains(root) {
        return Err(SpecificationError::UnknownType(root.to_string()));
    }

    let field = registry
        .field(root, column)
        .ok_or_else(|| SpecificationError::UnknownField {
            type_name: root.to_string(),
            path: column.to_string(),
        })?;

    if !field.kind.is_ordered() {
        return Err(SpecificationError::UnsupportedFieldKind {
            field: field.name.to_string(),
            kind: field.kind.to_string(),
            usage: "sorting",
        });
    }

    Ok(OrderBy::new(field.name, field.kind, direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, registry, Device, DeviceKind, Status};

    fn rows() -> Vec<Device> {
        let mut rows = vec![
            device("b", DeviceKind::Sensor, Status::Active, Some(5.0), None),
            device("a", DeviceKind::Sensor, Status::Retired, None, None),
            device("c", DeviceKind::Actuator, Status::Inactive, Some(1.0), None),
            device("d", DeviceKind::Actuator, Status::Active, Some(5.0), None),
        ];
        for (i, row) in rows.iter_mut().enumerate() {
            row.base.id = i as i64 + 1;
        }
        rows
    }

    fn ids(rows: &[Device]) -> Vec<i64> {
        rows.iter().map(|d| d.base.id).collect()
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("".parse::<SortDirection>().unwrap(), SortDirection::None);
        assert_eq!(
            "Descending".parse::<SortDirection>().unwrap(),
            SortDirection::Descending
        );
        assert_eq!(
            "Sideways".parse::<SortDirection>().unwrap_err(),
            SpecificationError::UnknownDirection("Sideways".into())
        );
    }

    #[test]
    fn test_default_orders_by_id_descending() {
        let registry = registry();
        for param in [
            SortParam::default(),
            SortParam::new("name", SortDirection::None),
            SortParam::ascending(""),
        ] {
            let order = resolve(&param, "Device", &registry).unwrap();
            let mut rows = rows();
            order.sort(&mut rows);
            assert_eq!(ids(&rows), vec![4, 3, 2, 1]);
        }
    }

    #[test]
    fn test_ascending_and_descending_field() {
        let registry = registry();
        let mut rows = rows();
        resolve(&SortParam::ascending("NAME"), "Device", &registry)
            .unwrap()
            .sort(&mut rows);
        assert_eq!(ids(&rows), vec![2, 1, 3, 4]);

        resolve(&SortParam::descending("status"), "Device", &registry)
            .unwrap()
            .sort(&mut rows);
        assert_eq!(ids(&rows), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_sort_is_stable_with_nulls_first() {
        let mut rows = rows();
        resolve(&SortParam::ascending("temperature"), "Device", &registry())
            .unwrap()
            .sort(&mut rows);
        assert_eq!(ids(&rows), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_nested_paths_and_unordered_fields_are_rejected() {
        let registry = registry();
        assert!(matches!(
            resolve(&SortParam::ascending("location.city"), "Device", &registry),
            Err(SpecificationError::UnknownField { .. })
        ));
        assert!(matches!(
            resolve(&SortParam::ascending("settings"), "Device", &registry),
            Err(SpecificationError::UnsupportedFieldKind { .. })
        ));
    }
}
