use thiserror::Error;

/// A filter, sort or include directive that cannot run against the model
///
/// Raised while parsing or compiling a [`DataProcessing`](super::DataProcessing),
/// always before any row is read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecificationError {
    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("unknown sort direction '{0}'")]
    UnknownDirection(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("field path '{path}' does not resolve on '{type_name}'")]
    UnknownField { type_name: String, path: String },

    #[error("'{segment}' on '{type_name}' is not a navigable reference")]
    NotNavigable { type_name: String, segment: String },

    #[error("cannot parse '{value}' as {kind}")]
    UnparsableValue { value: String, kind: String },

    #[error("field '{field}' of kind {kind} cannot be used for {usage}")]
    UnsupportedFieldKind {
        field: String,
        kind: String,
        usage: &'static str,
    },

    #[error("include path '{0}' does not name a relation")]
    InvalidInclude(String),

    #[error("type '{type_name}' extends unknown type '{parent}'")]
    UnknownParent { type_name: String, parent: String },

    #[error("type '{0}' is registered more than once")]
    DuplicateType(String),

    #[error("inheritance cycle through '{0}'")]
    InheritanceCycle(String),
}
