//! Error types and HTTP response conversion

use thiserror::Error;

use crate::processing::SpecificationError;
use crate::repository::RepositoryError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// A setting required by the caller is absent
    #[error("Missing {0}")]
    MissingConfig(String),

    /// Structured repository or unit of work error
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Rejected filter, sort or include directive
    #[error("Invalid query: {0}")]
    Specification(#[from] SpecificationError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "http")]
mod response {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde::{Deserialize, Serialize};

    use super::Error;
    use crate::handlers::ApiError;

    /// Error response body
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ErrorResponse {
        /// Error message
        pub error: String,

        /// Optional error code
        #[serde(skip_serializing_if = "Option::is_none")]
        pub code: Option<String>,

        /// HTTP status code
        pub status: u16,
    }

    impl ErrorResponse {
        /// Create a new error response
        pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
            Self {
                error: error.into(),
                code: None,
                status: status.as_u16(),
            }
        }

        /// Create error response with a code
        pub fn with_code(
            status: StatusCode,
            code: impl Into<String>,
            error: impl Into<String>,
        ) -> Self {
            Self {
                error: error.into(),
                code: Some(code.into()),
                status: status.as_u16(),
            }
        }
    }

    impl IntoResponse for Error {
        fn into_response(self) -> Response {
            let (status, error_response) = match self {
                Error::Repository(e) => return ApiError::from(e).into_response(),
                Error::Specification(e) => return ApiError::from(e).into_response(),

                Error::Config(e) => {
                    tracing::error!("Configuration error: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_code(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "CONFIG_ERROR",
                            "Service is misconfigured",
                        ),
                    )
                }

                Error::MissingConfig(key) => {
                    tracing::error!(key = %key, "Missing configuration");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_code(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "CONFIG_ERROR",
                            "Service is misconfigured",
                        ),
                    )
                }

                Error::Io(e) => {
                    tracing::error!("I/O error: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "I/O error"),
                    )
                }

                Error::Internal(msg) => {
                    tracing::error!("Internal error: {}", msg);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_code(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "INTERNAL_ERROR",
                            "An internal error occurred",
                        ),
                    )
                }
            };

            (status, Json(error_response)).into_response()
        }
    }
}

#[cfg(feature = "http")]
pub use response::ErrorResponse;
