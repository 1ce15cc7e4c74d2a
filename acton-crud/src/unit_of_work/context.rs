use std::future::Future;

use thiserror::Error;

use super::conflict::ConflictEntry;
use crate::repository::{RepositoryError, RepositoryResult};

/// Why [`DataContext::save_changes`] did not persist
#[derive(Debug, Clone, Error)]
pub enum SaveError {
    /// Version tokens diverged; nothing was written
    #[error("concurrency conflict on {} tracked entities", .0.len())]
    Conflict(Vec<ConflictEntry>),

    #[error(transparent)]
    Failed(#[from] RepositoryError),
}

/// Transactional, change-tracking storage session driven by a
/// [`UnitOfWork`](super::UnitOfWork)
pub trait DataContext: Send + Sync + 'static {
    /// Handle to an open physical transaction
    type Transaction: Send + Sync;

    fn begin_transaction(&self) -> impl Future<Output = RepositoryResult<Self::Transaction>> + Send;

    fn commit_transaction(
        &self,
        transaction: &Self::Transaction,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    fn rollback_transaction(
        &self,
        transaction: &Self::Transaction,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Persist every staged change atomically, returning the number of rows written
    fn save_changes(&self) -> impl Future<Output = Result<usize, SaveError>> + Send;

    /// Replace tracked original and current values with merged ones
    fn apply_resolution(
        &self,
        resolved: Vec<ConflictEntry>,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;
}
