//! Repository error types
//!
//! This module provides structured error types for repository and unit of
//! work operations, so callers can tell a missing entity from a bad query
//! specification, a concurrency conflict or a failed transaction.
//!
//! # Example
//!
//! ```rust
//! use acton_crud::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("Device", "42");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

use crate::processing::SpecificationError;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Finding a single entity by ID
    FindById,
    /// Finding entities with a data process or predicates
    FindAll,
    /// Counting entities
    Count,
    /// Checking whether any entity matches
    Exists,
    /// Staging a new entity
    Create,
    /// Staging changes to an entity
    Update,
    /// Staging removal of an entity
    Delete,
    /// Set-based update bypassing the change tracker
    BulkUpdate,
    /// Set-based delete bypassing the change tracker
    BulkDelete,
    /// Persisting pending changes
    Save,
    /// Beginning, committing or rolling back a transaction
    Transaction,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FindById => write!(f, "find_by_id"),
            Self::FindAll => write!(f, "find_all"),
            Self::Count => write!(f, "count"),
            Self::Exists => write!(f, "exists"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::BulkUpdate => write!(f, "bulk_update"),
            Self::BulkDelete => write!(f, "bulk_delete"),
            Self::Save => write!(f, "save"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Entity was not found
    NotFound,
    /// Filter, sort or include directive rejected before execution
    InvalidSpecification,
    /// Stored version token differs from the one read at load time
    ConcurrencyConflict,
    /// Transaction could not be opened, committed or rolled back
    TransactionFailed,
    /// Failed to reach the data store
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Underlying data store error
    DatabaseError,
    /// Serialization or deserialization error
    SerializationError,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidSpecification => write!(f, "invalid_specification"),
            Self::ConcurrencyConflict => write!(f, "concurrency_conflict"),
            Self::TransactionFailed => write!(f, "transaction_failed"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::DatabaseError => write!(f, "database_error"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// # Example
///
/// ```rust
/// use acton_crud::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::transaction_failed("commit refused")
///     .add_context("outer transaction");
/// assert_eq!(error.operation, RepositoryOperation::Transaction);
/// assert!(error.to_string().contains("outer transaction"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "Device")
    pub entity_type: Option<String>,
    /// The ID of the entity involved
    pub entity_id: Option<String>,
    /// Additional context, such as the error this one wraps
    pub context: Option<String>,
}

impl RepositoryError {
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
            context: None,
        }
    }

    /// Create a "not found" error with entity context
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::FindById,
            RepositoryErrorKind::NotFound,
            "Entity not found",
        )
        .with_entity(entity_type, entity_id)
    }

    /// A rejected filter, sort or include directive
    pub fn invalid_specification(operation: RepositoryOperation, source: &SpecificationError) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::InvalidSpecification,
            source.to_string(),
        )
    }

    pub fn concurrency_conflict(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Save,
            RepositoryErrorKind::ConcurrencyConflict,
            message,
        )
    }

    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Transaction,
            RepositoryErrorKind::TransactionFailed,
            message,
        )
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Transaction,
            RepositoryErrorKind::ConnectionFailed,
            message,
        )
    }

    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    /// Add entity context to an existing error
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    #[must_use]
    pub fn add_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let (Some(ref entity_type), Some(ref entity_id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " [{}: {}]", entity_type, entity_id)?;
        }
        if let Some(ref ctx) = self.context {
            write!(f, " [context: {}]", ctx)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

impl From<SpecificationError> for RepositoryError {
    fn from(err: SpecificationError) -> Self {
        Self::invalid_specification(RepositoryOperation::FindAll, &err)
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(RepositoryOperation::FindAll, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_operation_display() {
        assert_eq!(format!("{}", RepositoryOperation::FindById), "find_by_id");
        assert_eq!(format!("{}", RepositoryOperation::BulkUpdate), "bulk_update");
        assert_eq!(format!("{}", RepositoryOperation::BulkDelete), "bulk_delete");
        assert_eq!(format!("{}", RepositoryOperation::Save), "save");
        assert_eq!(format!("{}", RepositoryOperation::Transaction), "transaction");
    }

    #[test]
    fn test_repository_error_kind_display() {
        assert_eq!(format!("{}", RepositoryErrorKind::NotFound), "not_found");
        assert_eq!(
            format!("{}", RepositoryErrorKind::InvalidSpecification),
            "invalid_specification"
        );
        assert_eq!(
            format!("{}", RepositoryErrorKind::ConcurrencyConflict),
            "concurrency_conflict"
        );
        assert_eq!(
            format!("{}", RepositoryErrorKind::TransactionFailed),
            "transaction_failed"
        );
    }

    #[test]
    fn test_not_found_convenience() {
        let error = RepositoryError::not_found("Device", "7");
        assert_eq!(error.operation, RepositoryOperation::FindById);
        assert!(error.is_not_found());
        assert_eq!(error.entity_type, Some("Device".to_string()));
        assert_eq!(error.entity_id, Some("7".to_string()));
    }

    #[test]
    fn test_from_specification_error() {
        let error: RepositoryError = SpecificationError::UnknownOperator("Nope".into()).into();
        assert_eq!(error.kind, RepositoryErrorKind::InvalidSpecification);
        assert!(error.message.contains("Nope"));
    }

    #[test]
    fn test_is_retriable() {
        assert!(RepositoryError::connection_failed("refused").is_retriable());
        assert!(!RepositoryError::not_found("Device", "1").is_retriable());
        assert!(!RepositoryError::transaction_failed("boom").is_retriable());
        assert!(!RepositoryError::concurrency_conflict("stale").is_retriable());
    }

    #[test]
    fn test_display_with_entity_and_context() {
        let error = RepositoryError::not_found("Device", "7").add_context("remove");
        let display = format!("{}", error);
        assert!(display.contains("not_found"));
        assert!(display.contains("[Device: 7]"));
        assert!(display.contains("[context: remove]"));

        let bare = RepositoryError::database_error(RepositoryOperation::Save, "disk full");
        assert!(!format!("{}", bare).contains('['));
    }
}
