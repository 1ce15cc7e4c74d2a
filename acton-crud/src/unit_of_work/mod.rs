//! Unit of work: nested transactions and optimistic-concurrency commits
//!
//! A [`UnitOfWork`] owns the physical transaction of one request. Services
//! call [`start_transaction`](UnitOfWork::start_transaction) and
//! [`commit_transaction`](UnitOfWork::commit_transaction) in pairs; only the
//! outermost pair opens and commits the physical transaction, so services can
//! call each other without closing a transaction they do not own.
//!
//! [`commit`](UnitOfWork::commit) saves staged changes. On a concurrency
//! conflict it merges field by field (the stored value wins only where the
//! caller did not change anything) and retries exactly once. A second
//! conflict is logged and reported as [`CommitOutcome::Abandoned`] instead of
//! an error. Any other save failure rolls the transaction back.
//!
//! # Example
//!
//! ```rust,ignore
//! let uow = Arc::new(UnitOfWork::new(context.clone()));
//!
//! let device = uow
//!     .with_transaction(|| async {
//!         let device = repository.add(device).await?;
//!         uow.commit().await?;
//!         Ok(device)
//!     })
//!     .await?;
//! ```

mod conflict;
mod context;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::repository::{RepositoryError, RepositoryResult};

pub use conflict::{ConflictEntry, PropertyBag};
pub use context::{DataContext, SaveError};

/// Result of a successful [`UnitOfWork::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CommitOutcome {
    /// Saved on the first attempt
    Saved(usize),
    /// Saved after merging a concurrency conflict
    Merged(usize),
    /// Conflicted again after the merge; nothing was written
    Abandoned,
}

impl CommitOutcome {
    /// Rows written
    pub fn rows(&self) -> usize {
        match self {
            Self::Saved(rows) | Self::Merged(rows) => *rows,
            Self::Abandoned => 0,
        }
    }
}

struct TransactionState<T> {
    active: Option<T>,
    depth: u32,
}

/// Transaction boundary over one [`DataContext`]
///
/// Meant for a single logical caller; share it by `Arc` among the
/// repositories and services of one request.
pub struct UnitOfWork<C: DataContext> {
    context: Arc<C>,
    state: Mutex<TransactionState<C::Transaction>>,
}

impl<C: DataContext> UnitOfWork<C> {
    pub fn new(context: Arc<C>) -> Self {
        Self {
            context,
            state: Mutex::new(TransactionState {
                active: None,
                depth: 0,
            }),
        }
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// Current nesting depth
    pub async fn transaction_depth(&self) -> u32 {
        self.state.lock().await.depth
    }

    pub async fn has_active_transaction(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Enter a transaction level, opening the physical transaction if none is active
    ///
    /// # Errors
    ///
    /// The data context's error when the transaction cannot be opened; the
    /// nesting depth is left unchanged.
    pub async fn start_transaction(&self) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        state.depth += 1;

        if state.active.is_none() {
            match self.context.begin_transaction().await {
                Ok(transaction) => {
                    state.active = Some(transaction);
                    debug!(depth = state.depth, "Transaction opened");
                }
                Err(e) => {
                    state.depth -= 1;
                    error!(error = %e, "Failed to open transaction");
                    return Err(e);
                }
            }
        } else {
            debug!(depth = state.depth, "Joined active transaction");
        }

        Ok(())
    }

    /// Save staged changes, merging and retrying once on a concurrency conflict
    ///
    /// # Errors
    ///
    /// Any non-conflict save failure. The active transaction, if any, has
    /// been rolled back and cleared by the time the error is returned.
    pub async fn commit(&self) -> RepositoryResult<CommitOutcome> {
        let entries = match self.context.save_changes().await {
            Ok(rows) => return Ok(CommitOutcome::Saved(rows)),
            Err(SaveError::Conflict(entries)) => entries,
            Err(SaveError::Failed(e)) => return Err(self.abort(e).await),
        };

        warn!(
            conflicts = entries.len(),
            "Concurrency conflict on save, merging stored values"
        );
        let resolved = entries.into_iter().map(ConflictEntry::merge).collect();
        if let Err(e) = self.context.apply_resolution(resolved).await {
            return Err(self.abort(e).await);
        }

        match self.context.save_changes().await {
            Ok(rows) => {
                info!(rows, "Saved after merging concurrency conflict");
                Ok(CommitOutcome::Merged(rows))
            }
            Err(SaveError::Conflict(entries)) => {
                warn!(
                    conflicts = entries.len(),
                    "Concurrency conflict persisted after merge, save abandoned"
                );
                Ok(CommitOutcome::Abandoned)
            }
            Err(SaveError::Failed(e)) => Err(self.abort(e).await),
        }
    }

    async fn abort(&self, cause: RepositoryError) -> RepositoryError {
        let mut state = self.state.lock().await;
        if let Some(transaction) = state.active.take() {
            if let Err(e) = self.context.rollback_transaction(&transaction).await {
                error!(error = %e, "Rollback after failed save also failed");
            }
        }
        error!(error = %cause, "Save failed");
        RepositoryError::transaction_failed("An error happened while saving changes")
            .add_context(cause.to_string())
    }

    /// Leave a transaction level, committing the physical transaction at the outermost one
    ///
    /// # Errors
    ///
    /// The commit failure, after the transaction has been rolled back and
    /// cleared. The depth is decremented either way.
    pub async fn commit_transaction(&self) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            warn!("commit_transaction called without a matching start_transaction");
            return Ok(());
        }

        let mut result = Ok(());
        if state.depth == 1 {
            if let Some(transaction) = state.active.take() {
                match self.context.commit_transaction(&transaction).await {
                    Ok(()) => debug!("Transaction committed"),
                    Err(e) => {
                        error!(error = %e, "Commit failed, rolling back");
                        if let Err(rollback) = self.context.rollback_transaction(&transaction).await {
                            error!(error = %rollback, "Rollback after failed commit also failed");
                        }
                        result = Err(RepositoryError::transaction_failed(
                            "Failed to commit transaction",
                        )
                        .add_context(e.to_string()));
                    }
                }
            }
        }

        state.depth -= 1;
        result
    }

    /// Leave a transaction level, rolling back the physical transaction at the outermost one
    pub async fn rollback_transaction(&self) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            warn!("rollback_transaction called without a matching start_transaction");
            return Ok(());
        }

        let mut result = Ok(());
        if state.depth == 1 {
            if let Some(transaction) = state.active.take() {
                result = self.context.rollback_transaction(&transaction).await;
                debug!("Transaction rolled back");
            }
        }

        state.depth -= 1;
        result
    }

    /// Run `body` inside a transaction level
    ///
    /// On success the staged changes are committed and the level is closed;
    /// on failure the level is rolled back and the body's error returned.
    pub async fn with_transaction<T, F, Fut>(&self, body: F) -> RepositoryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.start_transaction().await?;

        let outcome = match body().await {
            Ok(value) => self.commit().await.map(|_| value),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback_transaction().await {
                    error!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}
