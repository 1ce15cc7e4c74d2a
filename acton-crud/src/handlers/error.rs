//! API error types for entity endpoints
//!
//! This module maps repository and specification errors onto HTTP responses
//! via `IntoResponse`: a rejected filter is a 400, a missing entity a 404, an
//! unresolved concurrency conflict a 409 and everything else a 500.
//!
//! # Example
//!
//! ```rust
//! use acton_crud::handlers::{ApiError, ApiErrorKind};
//!
//! let error = ApiError::not_found("Device", "42");
//! assert!(matches!(error.kind, ApiErrorKind::NotFound));
//! assert_eq!(error.entity_id, Some("42".to_string()));
//! ```

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::processing::SpecificationError;
use crate::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};

/// Operation being performed when the API error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    /// Listing entities, with or without a data process
    List,
    /// Getting a single entity
    Get,
    /// Counting the rows after a cursor
    Count,
    Create,
    Update,
    Delete,
    /// Opening, committing or rolling back a transaction
    Transaction,
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Get => write!(f, "get"),
            Self::Count => write!(f, "count"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// Category of API error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    NotFound,
    /// Filter, sort, include or body rejected
    BadRequest,
    /// Concurrency conflict that could not be merged
    Conflict,
    /// Transaction could not be completed
    TransactionFailed,
    InternalError,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::BadRequest => write!(f, "bad_request"),
            Self::Conflict => write!(f, "conflict"),
            Self::TransactionFailed => write!(f, "transaction_failed"),
            Self::InternalError => write!(f, "internal_error"),
        }
    }
}

impl ApiErrorKind {
    /// Get the HTTP status code for this error kind
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::TransactionFailed | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error kind
    #[must_use]
    pub fn error_code(&self) -> String {
        format!("{}", self).to_uppercase()
    }
}

/// Structured API error with operation context
///
/// # Example
///
/// ```rust
/// use acton_crud::handlers::{ApiError, ApiOperation};
///
/// let error = ApiError::bad_request("Unknown operator 'Like'")
///     .with_operation(ApiOperation::List);
/// assert!(error.to_string().contains("bad_request"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// The operation being performed when the error occurred
    pub operation: ApiOperation,
    /// The category of error
    pub kind: ApiErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "Device")
    pub entity_type: Option<String>,
    /// The ID of the entity involved
    pub entity_id: Option<String>,
}

impl ApiError {
    pub fn new(operation: ApiOperation, kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a "not found" error with entity context
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(ApiOperation::Get, ApiErrorKind::NotFound, "Entity not found")
            .with_entity(entity_type, entity_id)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ApiOperation::List, ApiErrorKind::BadRequest, message)
    }

    pub fn conflict(operation: ApiOperation, message: impl Into<String>) -> Self {
        Self::new(operation, ApiErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiOperation::Get, ApiErrorKind::InternalError, message)
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
    pub fn with_operation(mut self, operation: ApiOperation) -> Self {
        self.operation = operation;
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let (Some(ref entity_type), Some(ref entity_id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " [{}: {}]", entity_type, entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Response body for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        let code = self.kind.error_code();

        if status.is_server_error() {
            tracing::error!(
                operation = %self.operation,
                kind = %self.kind,
                entity_type = ?self.entity_type,
                entity_id = ?self.entity_id,
                "API error: {}", self.message
            );
        } else {
            tracing::warn!(
                operation = %self.operation,
                kind = %self.kind,
                entity_type = ?self.entity_type,
                entity_id = ?self.entity_id,
                "API error: {}", self.message
            );
        }

        let response = ApiErrorResponse {
            error: self.message,
            code,
            status: status.as_u16(),
            operation: Some(self.operation.to_string()),
            entity_type: self.entity_type,
            entity_id: self.entity_id,
        };

        (status, Json(response)).into_response()
    }
}

fn repository_operation_to_api_operation(op: RepositoryOperation) -> ApiOperation {
    match op {
        RepositoryOperation::FindById | RepositoryOperation::Exists => ApiOperation::Get,
        RepositoryOperation::FindAll => ApiOperation::List,
        RepositoryOperation::Count => ApiOperation::Count,
        RepositoryOperation::Create => ApiOperation::Create,
        RepositoryOperation::Update | RepositoryOperation::BulkUpdate => ApiOperation::Update,
        RepositoryOperation::Delete | RepositoryOperation::BulkDelete => ApiOperation::Delete,
        RepositoryOperation::Save | RepositoryOperation::Transaction => ApiOperation::Transaction,
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        let operation = repository_operation_to_api_operation(err.operation);

        let kind = match err.kind {
            RepositoryErrorKind::NotFound => ApiErrorKind::NotFound,
            RepositoryErrorKind::InvalidSpecification => ApiErrorKind::BadRequest,
            RepositoryErrorKind::ConcurrencyConflict => ApiErrorKind::Conflict,
            RepositoryErrorKind::TransactionFailed => ApiErrorKind::TransactionFailed,
            RepositoryErrorKind::ConnectionFailed
            | RepositoryErrorKind::Timeout
            | RepositoryErrorKind::DatabaseError
            | RepositoryErrorKind::SerializationError
            | RepositoryErrorKind::Other => ApiErrorKind::InternalError,
        };

        // Storage details stay in the logs
        let message = match kind {
            ApiErrorKind::InternalError => "An internal error occurred".to_string(),
            ApiErrorKind::TransactionFailed => "The transaction could not be completed".to_string(),
            _ => err.message,
        };

        Self {
            operation,
            kind,
            message,
            entity_type: err.entity_type,
            entity_id: err.entity_id,
        }
    }
}

impl From<SpecificationError> for ApiError {
    fn from(err: SpecificationError) -> Self {
        Self::bad_request(err.to_string())
    }
}
