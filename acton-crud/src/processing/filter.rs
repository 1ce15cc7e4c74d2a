//! Filter parameters and their compilation into [`Condition`]s
//!
//! A [`FilterParam`] names a (possibly dotted) column, an operator and one or
//! more string values. Compilation checks the column against the
//! [`TypeRegistry`], parses the values into the column's kind and produces a
//! [`Condition`] that can be evaluated against any [`Record`].
//!
//! Values of one parameter are OR-combined; separate parameters are
//! AND-combined by [`compile_all`].
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_crud::processing::{compile, FilterOperator, FilterParam};
//!
//! let param = FilterParam::new("location.city", FilterOperator::Equal)
//!     .value("Lyon")
//!     .value("Nantes");
//! let condition = compile(&param, "Device", &registry)?;
//! assert!(condition.evaluate(&device_in_lyon));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SpecificationError;
use crate::entity::{compare_values, resolve_path, FieldKind, Record, TypeRegistry, Value};

/// Operator of a [`FilterParam`]
///
/// Parses from its wire name. Both the short names (`"Greater"`,
/// `"LessEqual"`) and the long names (`"GreaterThan"`, `"LessOrEqual"`) are
/// accepted; the empty string is [`FilterOperator::None`]. Any other name is a
/// [`SpecificationError::UnknownOperator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterOperator {
    /// Accept every row
    #[default]
    None,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
    /// Case-sensitive substring match on the textual form of the field
    Contains,
    /// Runtime type check against a registered type name
    IsType,
}

impl FilterOperator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::GreaterThan => "Greater",
            Self::GreaterOrEqual => "GreaterEqual",
            Self::LessThan => "Less",
            Self::LessOrEqual => "LessEqual",
            Self::Equal => "Equal",
            Self::NotEqual => "NotEqual",
            Self::Contains => "Contains",
            Self::IsType => "IsType",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = SpecificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "None" => Ok(Self::None),
            "Greater" | "GreaterThan" => Ok(Self::GreaterThan),
            "GreaterEqual" | "GreaterOrEqual" => Ok(Self::GreaterOrEqual),
            "Less" | "LessThan" => Ok(Self::LessThan),
            "LessEqual" | "LessOrEqual" => Ok(Self::LessOrEqual),
            "Equal" => Ok(Self::Equal),
            "NotEqual" => Ok(Self::NotEqual),
            "Contains" => Ok(Self::Contains),
            "IsType" => Ok(Self::IsType),
            other => Err(SpecificationError::UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for FilterOperator {
    type Error = SpecificationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterOperator> for String {
    fn from(operator: FilterOperator) -> Self {
        operator.as_str().to_string()
    }
}

/// One declarative filter over an entity column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParam {
    /// Dotted field path, resolved case-insensitively
    #[serde(default)]
    pub column_name: String,
    /// Comparison values, OR-combined
    #[serde(default)]
    pub filter_value: Vec<String>,
    #[serde(default, rename = "filter_option_name")]
    pub operator: FilterOperator,
    /// Resolve `column_name` against this type; rows of other types never match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_to_type: Option<String>,
}

impl FilterParam {
    pub fn new(column_name: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            column_name: column_name.into(),
            filter_value: Vec::new(),
            operator,
            cast_to_type: None,
        }
    }

    /// Runtime type filter; the column is not used
    pub fn is_type(type_name: impl Into<String>) -> Self {
        Self::new("", FilterOperator::IsType).value(type_name)
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.filter_value.push(value.into());
        self
    }

    #[must_use]
    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_value.extend(values.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cast_to(mut self, type_name: impl Into<String>) -> Self {
        self.cast_to_type = Some(type_name.into());
        self
    }
}

/// A filter value parsed into the kind of the column it targets
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    /// Member name of an enumeration (validated at compile time)
    Enum(&'static str),
}

impl Scalar {
    /// Parse `raw` as a value of `kind`
    ///
    /// # Errors
    ///
    /// [`SpecificationError::UnparsableValue`] when `raw` is not a valid value
    /// of `kind`.
    pub fn parse(raw: &str, kind: &FieldKind) -> Result<Self, SpecificationError> {
        let unparsable = || SpecificationError::UnparsableValue {
            value: raw.to_string(),
            kind: kind.to_string(),
        };

        match kind {
            FieldKind::Text => Ok(Self::Text(raw.to_string())),
            FieldKind::Integer => raw.trim().parse().map(Self::Int).map_err(|_| unparsable()),
            FieldKind::Float => raw.trim().parse().map(Self::Float).map_err(|_| unparsable()),
            FieldKind::Boolean => match raw.trim() {
                v if v.eq_ignore_ascii_case("true") => Ok(Self::Bool(true)),
                v if v.eq_ignore_ascii_case("false") => Ok(Self::Bool(false)),
                _ => Err(unparsable()),
            },
            FieldKind::Timestamp => DateTime::parse_from_rfc3339(raw.trim())
                .map(|ts| Self::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| unparsable()),
            FieldKind::Uuid => Uuid::parse_str(raw.trim())
                .map(Self::Uuid)
                .map_err(|_| unparsable()),
            FieldKind::Enum(members) => members
                .iter()
                .copied()
                .find(|m| *m == raw)
                .map(Self::Enum)
                .ok_or_else(unparsable),
            FieldKind::Bytes
            | FieldKind::Json
            | FieldKind::Reference(_)
            | FieldKind::Collection(_) => Err(unparsable()),
        }
    }

    fn as_value(&self) -> Value<'_> {
        match self {
            Self::Bool(v) => Value::Bool(*v),
            Self::Int(v) => Value::Int(*v),
            Self::Float(v) => Value::Float(*v),
            Self::Text(v) => Value::Text(v),
            Self::Timestamp(v) => Value::Timestamp(*v),
            Self::Uuid(v) => Value::Uuid(*v),
            Self::Enum(v) => Value::Enum(v),
        }
    }
}

/// Comparison applied by [`Condition::Compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    fn from_operator(operator: FilterOperator) -> Option<Self> {
        match operator {
            FilterOperator::GreaterThan => Some(Self::GreaterThan),
            FilterOperator::GreaterOrEqual => Some(Self::GreaterOrEqual),
            FilterOperator::LessThan => Some(Self::LessThan),
            FilterOperator::LessOrEqual => Some(Self::LessOrEqual),
            FilterOperator::Equal => Some(Self::Equal),
            FilterOperator::NotEqual => Some(Self::NotEqual),
            FilterOperator::None | FilterOperator::Contains | FilterOperator::IsType => None,
        }
    }

    fn holds(&self, field: &Value<'_>, target: &Scalar, kind: &FieldKind) -> bool {
        if field.is_null() {
            return matches!(self, Self::NotEqual);
        }
        let ordering = compare_values(field, &target.as_value(), kind);
        match self {
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::LessThan => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
        }
    }
}

/// Compiled filter, evaluated against any [`Record`]
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    Never,
    /// Runtime type is one of the listed names
    TypeIn(Vec<&'static str>),
    /// Only records whose runtime type is listed are tested against `inner`
    Cast {
        accepted: Vec<&'static str>,
        inner: Box<Condition>,
    },
    /// Field compared against each target, OR-combined
    Compare {
        path: Vec<&'static str>,
        kind: FieldKind,
        comparison: Comparison,
        targets: Vec<Scalar>,
    },
    /// Textual form of the field contains any needle
    Contains {
        path: Vec<&'static str>,
        needles: Vec<String>,
    },
    /// Every condition holds
    All(Vec<Condition>),
}

impl Condition {
    pub fn evaluate(&self, record: &dyn Record) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::TypeIn(types) => types.contains(&record.type_name()),
            Self::Cast { accepted, inner } => {
                accepted.contains(&record.type_name()) && inner.evaluate(record)
            }
            Self::Compare {
                path,
                kind,
                comparison,
                targets,
            } => {
                let field = resolve_path(record, path);
                targets
                    .iter()
                    .any(|target| comparison.holds(&field, target, kind))
            }
            Self::Contains { path, needles } => {
                let field = resolve_path(record, path);
                if field.is_null() {
                    return false;
                }
                let text = field.to_string();
                needles.iter().any(|needle| text.contains(needle.as_str()))
            }
            Self::All(conditions) => conditions.iter().all(|c| c.evaluate(record)),
        }
    }
}

/// Compile one filter against the `root` type
///
/// # Errors
///
/// Any [`SpecificationError`] about the column path, the cast type, the
/// column kind or the values. An unknown `IsType` target is not an error: it
/// compiles to [`Condition::Never`].
pub fn compile(
    param: &FilterParam,
    root: &str,
    registry: &TypeRegistry,
) -> Result<Condition, SpecificationError> {
    match param.operator {
        FilterOperator::None => return Ok(Condition::Always),
        FilterOperator::IsType => {
            return Ok(match param.filter_value.first() {
                Some(name) if registry.contains(name) => {
                    Condition::TypeIn(registry.with_descendants(name))
                }
                _ => Condition::Never,
            })
        }
        _ => {}
    }

    let target_type = match &param.cast_to_type {
        Some(cast) if !registry.contains(cast) => {
            return Err(SpecificationError::UnknownType(cast.clone()))
        }
        Some(cast) => cast.as_str(),
        None => root,
    };

    let resolved = registry.resolve_path(target_type, &param.column_name)?;
    let field = resolved.field;

    let condition = if param.operator == FilterOperator::Contains {
        if !field.kind.is_textual() {
            return Err(SpecificationError::UnsupportedFieldKind {
                field: resolved.dotted(),
                kind: field.kind.to_string(),
                usage: "Contains",
            });
        }
        Condition::Contains {
            path: resolved.segments,
            needles: param.filter_value.clone(),
        }
    } else {
        let comparison = Comparison::from_operator(param.operator).ok_or_else(|| {
            SpecificationError::UnknownOperator(param.operator.to_string())
        })?;
        if !(field.kind.is_ordered() && field.kind.is_parsable()) {
            return Err(SpecificationError::UnsupportedFieldKind {
                field: resolved.dotted(),
                kind: field.kind.to_string(),
                usage: "comparison",
            });
        }
        let targets = param
            .filter_value
            .iter()
            .map(|raw| Scalar::parse(raw, &field.kind))
            .collect::<Result<Vec<_>, _>>()?;
        Condition::Compare {
            path: resolved.segments,
            kind: field.kind,
            comparison,
            targets,
        }
    };

    Ok(match &param.cast_to_type {
        Some(cast) => Condition::Cast {
            accepted: registry.with_descendants(cast),
            inner: Box::new(condition),
        },
        None => condition,
    })
}

/// Compile every filter and AND-combine the results
///
/// # Errors
///
/// The first [`SpecificationError`] raised by [`compile`].
pub fn compile_all(
    params: &[FilterParam],
    root: &str,
    registry: &TypeRegistry,
) -> Result<Condition, SpecificationError> {
    params
        .iter()
        .map(|param| compile(param, root, registry))
        .collect::<Result<Vec<_>, _>>()
        .map(Condition::All)
}
