//! HTTP surface for entity services
//!
//! This module exposes [`BaseService`](crate::service::BaseService)s over
//! axum, one per request. It builds on the repository error types to provide HTTP-aware error
//! handling.
//!
//! # Features
//!
//! - **CRUD routes**: [`EntityEndpoints`] mounts the routes selected by [`EndpointFlags`]
//! - **Data processing bodies**: listings accept filters, sort and includes as JSON
//! - **Error Handling**: [`ApiError`] with automatic HTTP status code mapping
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_crud::handlers::{EndpointFlags, EntityEndpoints};
//!
//! let devices = BaseService::<MemoryContext, Device>::factory(
//!     move || Arc::new(MemoryContext::new(database.clone())),
//!     registry,
//!     DataConfig::default(),
//! );
//!
//! let app: axum::Router = axum::Router::new()
//!     .merge(EntityEndpoints::router(devices, EndpointFlags::ALL | EndpointFlags::TO_LOGS));
//! ```

mod endpoints;
mod error;

pub use endpoints::{EndpointFlags, EntityEndpoints};
pub use error::{ApiError, ApiErrorKind, ApiErrorResponse, ApiOperation};
