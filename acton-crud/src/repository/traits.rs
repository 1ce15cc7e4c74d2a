//! Queryable entity source consumed by repositories
//!
//! This module uses RPITIT (Return Position Impl Trait In Traits), so data
//! contexts implement the methods as plain `async fn`s without `async_trait`.
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_crud::repository::{EntitySource, FetchPlan, RepositoryResult};
//!
//! impl EntitySource<Device> for PgContext {
//!     async fn fetch(&self, plan: FetchPlan<Device>) -> RepositoryResult<Vec<Device>> {
//!         // translate the plan, load rows, apply the predicates
//!         todo!()
//!     }
//!     // ... other methods
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::error::RepositoryError;
use crate::entity::Entity;
use crate::processing::{IncludeSet, OrderBy};

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Row filter built from a compiled condition or written by hand
pub type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// In-place modification applied by set-based updates
pub type Patch<E> = Arc<dyn Fn(&mut E) + Send + Sync>;

/// Wrap a closure as a [`Predicate`]
pub fn predicate<E, F>(f: F) -> Predicate<E>
where
    F: Fn(&E) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`Patch`]
pub fn patch<E, F>(f: F) -> Patch<E>
where
    F: Fn(&mut E) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Everything a data context needs to run one fetch
pub struct FetchPlan<E> {
    /// AND-combined
    pub filters: Vec<Predicate<E>>,
    /// `None` keeps storage order
    pub order: Option<OrderBy>,
    pub includes: IncludeSet,
    /// One query per included relation instead of a single join
    pub split_query: bool,
    pub limit: Option<usize>,
    /// Register loaded rows with the change tracker
    pub tracking: bool,
}

impl<E> FetchPlan<E> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            order: None,
            includes: IncludeSet::new(),
            split_query: false,
            limit: None,
            tracking: false,
        }
    }

    #[must_use]
    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.filters.push(predicate);
        self
    }

    #[must_use]
    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate<E>>) -> Self {
        self.filters.extend(predicates);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    /// Set the includes; split-query mode follows from them
    #[must_use]
    pub fn include(mut self, includes: IncludeSet) -> Self {
        self.split_query = includes.requires_split_query();
        self.includes = includes;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn tracked(mut self, tracking: bool) -> Self {
        self.tracking = tracking;
        self
    }

    /// Whether `row` passes every filter
    pub fn matches(&self, row: &E) -> bool {
        self.filters.iter().all(|f| f(row))
    }
}

impl<E> Default for FetchPlan<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for FetchPlan<E> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order: self.order,
            includes: self.includes.clone(),
            split_query: self.split_query,
            limit: self.limit,
            tracking: self.tracking,
        }
    }
}

impl<E> fmt::Debug for FetchPlan<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchPlan")
            .field("filters", &self.filters.len())
            .field("order", &self.order)
            .field("includes", &self.includes)
            .field("split_query", &self.split_query)
            .field("limit", &self.limit)
            .field("tracking", &self.tracking)
            .finish()
    }
}

/// A queryable, change-tracked source of `E` rows
///
/// Staging methods only record intent; nothing reaches storage until the
/// owning [`DataContext`](crate::unit_of_work::DataContext) saves. Set-based
/// operations bypass the tracker and write immediately.
pub trait EntitySource<E: Entity>: Send + Sync {
    /// Filter, order, limit and load rows
    fn fetch(&self, plan: FetchPlan<E>) -> impl Future<Output = RepositoryResult<Vec<E>>> + Send;

    /// Count rows passing every filter
    fn count(
        &self,
        filters: Vec<Predicate<E>>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Stage an insert; the returned entity carries its assigned id
    fn stage_add(&self, entity: E) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Stage an update of a stored entity
    fn stage_update(&self, entity: E) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Stage removal of a stored entity
    fn stage_remove(&self, entity: E) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Apply `patch` to every matching row, regenerating version tokens
    fn execute_update(
        &self,
        filters: Vec<Predicate<E>>,
        patch: Patch<E>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Delete every matching row
    fn execute_delete(
        &self,
        filters: Vec<Predicate<E>>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;
}
