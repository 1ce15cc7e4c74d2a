//! # acton-crud
//!
//! Generic CRUD data access for entity types: a dynamic query pipeline and a
//! unit of work with optimistic concurrency.
//!
//! ## Features
//!
//! - **Query pipeline**: filters, sort, includes and cursor pagination described as data
//!   ([`DataProcessing`](processing::DataProcessing)) and validated against a [`TypeRegistry`](entity::TypeRegistry)
//! - **Repositories**: [`BaseRepository`](repository::BaseRepository) over any
//!   [`EntitySource`](repository::EntitySource)
//! - **Unit of work**: nested transactions, field-level merge on concurrency conflicts and a single retry
//! - **In-memory backend**: [`MemoryContext`](memory::MemoryContext) with change tracking and rollback
//! - **HTTP**: per-entity axum routes selected with [`EndpointFlags`](handlers::EndpointFlags) (`http` feature)
//! - **Configuration**: figment layering of defaults, TOML files and `ACTON_CRUD_` environment variables
//!
//! ## Example
//!
//! ```rust,ignore
//! use acton_crud::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     let _log = init_tracing(&config)?;
//!
//!     let registry = Arc::new(TypeRegistry::builder().entity::<Device>().build()?);
//!     let database = Arc::new(MemoryDatabase::new());
//!     let devices = BaseService::<_, Device>::factory(
//!         move || Arc::new(MemoryContext::new(database.clone())),
//!         registry,
//!         config.data.clone(),
//!     );
//!
//!     let page = devices()
//!         .get_with_pagination(&PaginationParam::first(DataProcessing::default()), 20)
//!         .await?;
//!
//!     let app: axum::Router = axum::Router::new()
//!         .merge(EntityEndpoints::router(devices, EndpointFlags::ALL));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod memory;
pub mod observability;
pub mod processing;
pub mod repository;
pub mod service;
pub mod unit_of_work;

#[cfg(feature = "http")]
pub mod handlers;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::config::{Config, DataConfig, DatabaseConfig, ServiceConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::{init_tracing, service_span, LogLevelSwitch};

    pub use crate::entity::{
        BaseDto, BaseEntity, Dto, Entity, EntityId, FieldDef, FieldKind, Record, TypeDescriptor,
        TypeRegistry, Value,
    };
    pub use crate::processing::{
        DataProcessing, FilterOperator, FilterParam, IncludeSet, OrderDirection, PaginationParam,
        SortDirection, SortParam, SpecificationError,
    };
    pub use crate::repository::{
        patch, predicate, BaseRepository, EntitySource, FetchPlan, RepositoryError,
        RepositoryErrorKind, RepositoryOperation, RepositoryResult,
    };
    pub use crate::unit_of_work::{CommitOutcome, ConflictEntry, DataContext, SaveError, UnitOfWork};
    pub use crate::memory::{MemoryContext, MemoryDatabase};
    pub use crate::service::{BaseService, ServiceFactory};

    #[cfg(feature = "http")]
    pub use crate::error::ErrorResponse;

    #[cfg(feature = "http")]
    pub use crate::handlers::{ApiError, ApiErrorKind, ApiOperation, EndpointFlags, EntityEndpoints};
}
