//! Generic repositories over a change-tracking data context
//!
//! This module provides a [`BaseRepository`] for every entity type, built on
//! the [`EntitySource`] trait that data contexts implement.
//!
//! # Features
//!
//! - **Data processing**: filters, sort and includes compiled from a
//!   [`DataProcessing`](crate::processing::DataProcessing) before any row is read
//! - **Cursor pagination**: pages start after the last id a caller saw
//! - **Required includes**: relations every fetch of the repository loads
//! - **Staged writes**: add, update and remove are saved by the
//!   [`UnitOfWork`](crate::unit_of_work::UnitOfWork)
//! - **Set-based writes**: `execute_update` and `execute_delete` bypass tracking
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_crud::processing::{DataProcessing, PaginationParam, SortParam};
//! use acton_crud::repository::BaseRepository;
//!
//! let repository = BaseRepository::<MemoryContext, Device>::new(context, registry);
//!
//! let page = repository
//!     .get_with_pagination(
//!         &PaginationParam::after(DataProcessing::default().sort(SortParam::ascending("name")), 17),
//!         20,
//!     )
//!     .await?;
//! ```

mod base;
mod error;
mod traits;

pub use base::BaseRepository;
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use traits::{patch, predicate, EntitySource, FetchPlan, Patch, Predicate, RepositoryResult};
