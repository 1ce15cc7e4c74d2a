//! Field-level access to entity values
//!
//! Entities expose their fields through [`Record::field`], a plain `match`
//! over declared field names. The predicate compiler and the sort resolver
//! only ever read entities through this trait, so a filter on `"location.city"`
//! is a chain of `field` calls rather than runtime reflection.
//!
//! # Example
//!
//! ```rust
//! use acton_crud::entity::{Record, Value};
//!
//! struct Tag {
//!     label: String,
//! }
//!
//! impl Record for Tag {
//!     fn type_name(&self) -> &'static str {
//!         "Tag"
//!     }
//!
//!     fn field(&self, name: &str) -> Option<Value<'_>> {
//!         match name {
//!             "label" => Some(Value::Text(&self.label)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let tag = Tag { label: "hot".into() };
//! assert_eq!(tag.field("label").map(|v| v.to_string()), Some("hot".to_string()));
//! ```

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::registry::FieldKind;

/// Read access to the fields of an entity (or of a nested owned value)
pub trait Record: Send + Sync {
    /// Runtime type name, matched against registry descriptors by `IsType` filters
    fn type_name(&self) -> &'static str;

    /// Value of the field with the given declared name
    ///
    /// Returns `None` when the record has no such field. A nullable field that
    /// holds no value is `Some(Value::Null)`.
    fn field(&self, name: &str) -> Option<Value<'_>>;
}

/// Borrowed view of a single field value
#[derive(Clone, Copy)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'a str),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    /// Member name of a closed enumeration
    Enum(&'static str),
    Bytes(&'a [u8]),
    Json(&'a serde_json::Value),
    /// To-one navigation into a nested record
    Record(&'a dyn Record),
}

impl Value<'_> {
    /// Whether this is [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Text(v) => write!(f, "Text({v:?})"),
            Self::Timestamp(v) => write!(f, "Timestamp({v})"),
            Self::Uuid(v) => write!(f, "Uuid({v})"),
            Self::Enum(v) => write!(f, "Enum({v})"),
            Self::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Self::Json(v) => write!(f, "Json({v})"),
            Self::Record(r) => write!(f, "Record({})", r.type_name()),
        }
    }
}

/// Textual representation used by `Contains` filters
impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Timestamp(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Enum(v) => f.write_str(v),
            Self::Bytes(v) => v.iter().try_for_each(|b| write!(f, "{b:02x}")),
            Self::Json(v) => write!(f, "{v}"),
            Self::Record(r) => f.write_str(r.type_name()),
        }
    }
}

/// Follow `path` from `record`, returning the value of the last segment
///
/// Every segment but the last must yield [`Value::Record`]; a null or missing
/// navigation short-circuits to [`Value::Null`].
pub fn resolve_path<'r>(record: &'r dyn Record, path: &[&str]) -> Value<'r> {
    let Some((last, navigation)) = path.split_last() else {
        return Value::Null;
    };

    let mut current = record;
    for segment in navigation {
        match current.field(segment) {
            Some(Value::Record(next)) => current = next,
            _ => return Value::Null,
        }
    }

    current.field(last).unwrap_or(Value::Null)
}

/// Total order over two values of the same field kind
///
/// Nulls sort before everything else. Enumerations order by member position
/// in `kind`, text orders ordinally. Mismatched variants compare equal.
pub fn compare_values(left: &Value<'_>, right: &Value<'_>, kind: &FieldKind) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
        (Value::Enum(a), Value::Enum(b)) => {
            kind.enum_position(a).cmp(&kind.enum_position(b))
        }
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inner {
        city: Option<String>,
    }

    impl Record for Inner {
        fn type_name(&self) -> &'static str {
            "Inner"
        }

        fn field(&self, name: &str) -> Option<Value<'_>> {
            match name {
                "city" => Some(self.city.as_deref().map_or(Value::Null, Value::Text)),
                _ => None,
            }
        }
    }

    struct Outer {
        inner: Option<Inner>,
        payload: Vec<u8>,
    }

    impl Record for Outer {
        fn type_name(&self) -> &'static str {
            "Outer"
        }

        fn field(&self, name: &str) -> Option<Value<'_>> {
            match name {
                "inner" => Some(
                    self.inner
                        .as_ref()
                        .map_or(Value::Null, |i| Value::Record(i as &dyn Record)),
                ),
                "payload" => Some(Value::Bytes(&self.payload)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_resolve_nested_path() {
        let outer = Outer {
            inner: Some(Inner {
                city: Some("Lyon".into()),
            }),
            payload: vec![],
        };
        assert_eq!(resolve_path(&outer, &["inner", "city"]).to_string(), "Lyon");
    }

    #[test]
    fn test_resolve_through_null_navigation() {
        let outer = Outer {
            inner: None,
            payload: vec![],
        };
        assert!(resolve_path(&outer, &["inner", "city"]).is_null());
        assert!(resolve_path(&outer, &[]).is_null());
    }

    #[test]
    fn test_display_bytes_as_hex() {
        let outer = Outer {
            inner: None,
            payload: vec![0xde, 0xad, 0x01],
        };
        assert_eq!(resolve_path(&outer, &["payload"]).to_string(), "dead01");
    }

    #[test]
    fn test_nulls_sort_first() {
        let kind = FieldKind::Integer;
        assert_eq!(
            compare_values(&Value::Null, &Value::Int(-5), &kind),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Int(3), &Value::Int(2), &kind),
            Ordering::Greater
        );
    }

    #[test]
    fn test_enum_orders_by_member_position() {
        let kind = FieldKind::Enum(&["Low", "High", "Critical"]);
        assert_eq!(
            compare_values(&Value::Enum("Critical"), &Value::Enum("High"), &kind),
            Ordering::Greater
        );
    }
}
