//! In-memory data context
//!
//! [`MemoryDatabase`] is the shared store: one table of serialized rows per
//! entity root type, each with its own id sequence. [`MemoryContext`] is the
//! per-request session over it. It tracks loaded entities, stages inserts,
//! updates and removals, and checks version tokens when saving, which makes
//! it a drop-in [`DataContext`] for tests and for services that do not need a
//! real database.
//!
//! Transactions journal the prior value of every row written while they are
//! open; rollback replays the journal backwards and detaches every tracked
//! entity.
//!
//! # Example
//!
//! ```rust,ignore
//! let database = Arc::new(MemoryDatabase::new());
//! let context = Arc::new(MemoryContext::new(database.clone()));
//! let repository = BaseRepository::<MemoryContext, Device>::new(context.clone(), registry);
//! let uow = UnitOfWork::new(context);
//!
//! let device = repository.add(device).await?;
//! uow.commit().await?;
//! ```

mod tracker;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entity::{Entity, EntityId, FieldKind, VERSION_KEY};
use crate::processing::{IncludeSet, OrderBy};
use crate::repository::{
    EntitySource, FetchPlan, Patch, Predicate, RepositoryError, RepositoryOperation,
    RepositoryResult,
};
use crate::unit_of_work::{ConflictEntry, DataContext, PropertyBag, SaveError};

use tracker::{ChangeTracker, EntryState};

#[derive(Debug, Default, Clone)]
struct Table {
    rows: BTreeMap<EntityId, PropertyBag>,
    next_id: EntityId,
}

impl Table {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared row store
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, outside any context
    pub async fn seed<E: Entity>(&self, mut entity: E) -> RepositoryResult<E> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(E::TYPE_NAME.to_string()).or_default();
        entity.set_id(table.allocate_id());
        entity.set_version(Uuid::new_v4());
        let row = to_bag(&entity, RepositoryOperation::Create)?;
        table.rows.insert(entity.id(), row);
        Ok(entity)
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Stored row, as written by the last save
    pub async fn row(&self, table: &str, id: EntityId) -> Option<PropertyBag> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|t| t.rows.get(&id))
            .cloned()
    }
}

/// Handle to an open memory transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTransaction {
    pub id: Uuid,
}

#[derive(Debug)]
struct UndoEntry {
    table: String,
    id: EntityId,
    previous: Option<PropertyBag>,
}

#[derive(Debug)]
struct Journal {
    transaction: Uuid,
    undo: Vec<UndoEntry>,
}

/// Shape of the last plan a [`MemoryContext`] executed
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSummary {
    pub entity: &'static str,
    pub includes: IncludeSet,
    pub split_query: bool,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
    pub tracking: bool,
}

/// Change-tracking session over a [`MemoryDatabase`]
///
/// Locks are always taken in the order tracker, journal, tables.
pub struct MemoryContext {
    database: Arc<MemoryDatabase>,
    tracker: Mutex<ChangeTracker>,
    journal: Mutex<Option<Journal>>,
    last_fetch: Mutex<Option<FetchSummary>>,
}

impl MemoryContext {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            tracker: Mutex::new(ChangeTracker::default()),
            journal: Mutex::new(None),
            last_fetch: Mutex::new(None),
        }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    pub async fn last_fetch(&self) -> Option<FetchSummary> {
        self.last_fetch.lock().await.clone()
    }

    /// Number of entities the tracker knows about
    pub async fn tracked_count(&self) -> usize {
        self.tracker.lock().await.len()
    }

    pub async fn in_transaction(&self) -> bool {
        self.journal.lock().await.is_some()
    }
}

fn to_bag<E: Entity>(entity: &E, operation: RepositoryOperation) -> RepositoryResult<PropertyBag> {
    match serde_json::to_value(entity) {
        Ok(JsonValue::Object(row)) => Ok(row),
        Ok(_) => Err(RepositoryError::serialization_error(
            operation,
            "Entity did not serialize to an object",
        )
        .with_entity(E::TYPE_NAME, entity.id().to_string())),
        Err(e) => Err(RepositoryError::serialization_error(operation, e.to_string())
            .with_entity(E::TYPE_NAME, entity.id().to_string())),
    }
}

fn from_bag<E: Entity>(row: &PropertyBag, operation: RepositoryOperation) -> RepositoryResult<E> {
    serde_json::from_value(JsonValue::Object(row.clone())).map_err(|e| {
        let id = row
            .get(crate::entity::ID_KEY)
            .map_or_else(|| "?".to_string(), ToString::to_string);
        RepositoryError::serialization_error(operation, e.to_string()).with_entity(E::TYPE_NAME, id)
    })
}

/// Relation columns of `E` and its subtypes that no include path starts
/// with, paired with the blank they read as
///
/// Required references cannot be blanked and always load.
fn unloaded_relations<E: Entity>(includes: &IncludeSet) -> Vec<(&'static str, JsonValue)> {
    let descriptors = E::descriptors();
    let mut family = vec![E::TYPE_NAME];
    loop {
        let before = family.len();
        for descriptor in &descriptors {
            let joins = descriptor.parent().is_some_and(|parent| family.contains(&parent));
            if joins && !family.contains(&descriptor.name()) {
                family.push(descriptor.name());
            }
        }
        if family.len() == before {
            break;
        }
    }

    let mut unloaded: Vec<(&'static str, JsonValue)> = Vec::new();
    for descriptor in descriptors.iter().filter(|d| family.contains(&d.name())) {
        for field in descriptor.own_fields() {
            let blank = match field.kind {
                FieldKind::Reference(_) if field.nullable => JsonValue::Null,
                FieldKind::Collection(_) => JsonValue::Array(Vec::new()),
                _ => continue,
            };
            let included = includes.iter().any(|path| {
                path.split('.')
                    .next()
                    .is_some_and(|head| head.trim().eq_ignore_ascii_case(field.name))
            });
            if !included && unloaded.iter().all(|(name, _)| *name != field.name) {
                unloaded.push((field.name, blank));
            }
        }
    }
    unloaded
}

fn blank_relations(row: &PropertyBag, unloaded: &[(&'static str, JsonValue)]) -> PropertyBag {
    let mut row = row.clone();
    for (name, blank) in unloaded {
        if row.contains_key(*name) {
            row.insert((*name).to_string(), blank.clone());
        }
    }
    row
}

/// Give the row a fresh version token
fn stamp(row: &mut PropertyBag) {
    row.insert(
        VERSION_KEY.to_string(),
        JsonValue::String(Uuid::new_v4().to_string()),
    );
}

/// Write or delete a row, journaling its previous value when a transaction is open
fn put(
    tables: &mut HashMap<String, Table>,
    journal: &mut Option<Journal>,
    table: &str,
    id: EntityId,
    value: Option<PropertyBag>,
) {
    let rows = &mut tables.entry(table.to_string()).or_default().rows;
    let previous = match value {
        Some(row) => rows.insert(id, row),
        None => rows.remove(&id),
    };
    if let Some(journal) = journal.as_mut() {
        journal.undo.push(UndoEntry {
            table: table.to_string(),
            id,
            previous,
        });
    }
}

impl<E: Entity> EntitySource<E> for MemoryContext {
    async fn fetch(&self, plan: FetchPlan<E>) -> RepositoryResult<Vec<E>> {
        *self.last_fetch.lock().await = Some(FetchSummary {
            entity: E::TYPE_NAME,
            includes: plan.includes.clone(),
            split_query: plan.split_query,
            order: plan.order,
            limit: plan.limit,
            tracking: plan.tracking,
        });

        let unloaded = unloaded_relations::<E>(&plan.includes);
        let unloaded_names: Vec<&str> = unloaded.iter().map(|(name, _)| *name).collect();

        let mut tracker = self.tracker.lock().await;
        let tables = self.database.tables.read().await;

        // Filters see the full row; callers get it with unincluded relations blank
        let mut rows: Vec<(E, Option<PropertyBag>)> = Vec::new();
        if let Some(table) = tables.get(E::TYPE_NAME) {
            for (id, stored) in &table.rows {
                let entity: E = from_bag(stored, RepositoryOperation::FindAll)?;
                if !plan.matches(&entity) {
                    continue;
                }
                match tracker.get(E::TYPE_NAME, *id).map(|entry| entry.state) {
                    _ if !plan.tracking => {
                        let trimmed = blank_relations(stored, &unloaded);
                        rows.push((from_bag(&trimmed, RepositoryOperation::FindAll)?, None));
                    }
                    Some(EntryState::Deleted) => {}
                    Some(_) => {
                        tracker.load(E::TYPE_NAME, *id, stored, &unloaded_names);
                        if let Some(entry) = tracker.get(E::TYPE_NAME, *id) {
                            rows.push((from_bag(&entry.current, RepositoryOperation::FindAll)?, None));
                        }
                    }
                    None => {
                        let trimmed = blank_relations(stored, &unloaded);
                        rows.push((from_bag(&trimmed, RepositoryOperation::FindAll)?, Some(trimmed)));
                    }
                }
            }
        }
        drop(tables);

        if let Some(order) = plan.order {
            rows.sort_by(|l, r| order.compare(&l.0, &r.0));
        }
        if let Some(limit) = plan.limit {
            rows.truncate(limit);
        }

        let mut loaded = Vec::with_capacity(rows.len());
        for (entity, stored) in rows {
            if let Some(stored) = stored {
                tracker.attach(E::TYPE_NAME, entity.id(), &stored, &unloaded_names);
            }
            loaded.push(entity);
        }

        debug!(
            entity = E::TYPE_NAME,
            rows = loaded.len(),
            tracking = plan.tracking,
            "Fetched rows"
        );
        Ok(loaded)
    }

    async fn count(&self, filters: Vec<Predicate<E>>) -> RepositoryResult<u64> {
        let tables = self.database.tables.read().await;
        let Some(table) = tables.get(E::TYPE_NAME) else {
            return Ok(0);
        };

        let mut count = 0;
        for stored in table.rows.values() {
            let entity: E = from_bag(stored, RepositoryOperation::Count)?;
            if filters.iter().all(|f| f(&entity)) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn stage_add(&self, mut entity: E) -> RepositoryResult<E> {
        let mut tracker = self.tracker.lock().await;
        let id = self
            .database
            .tables
            .write()
            .await
            .entry(E::TYPE_NAME.to_string())
            .or_default()
            .allocate_id();

        entity.set_id(id);
        entity.set_version(Uuid::nil());
        tracker.add(E::TYPE_NAME, id, to_bag(&entity, RepositoryOperation::Create)?);
        debug!(entity = E::TYPE_NAME, id, "Staged insert");
        Ok(entity)
    }

    async fn stage_update(&self, entity: E) -> RepositoryResult<()> {
        let mut tracker = self.tracker.lock().await;
        let id = entity.id();
        let row = to_bag(&entity, RepositoryOperation::Update)?;

        let stored = match tracker.get(E::TYPE_NAME, id) {
            Some(_) => None,
            None => match self.database.row(E::TYPE_NAME, id).await {
                Some(stored) => Some(stored),
                None => {
                    return Err(RepositoryError::not_found(E::TYPE_NAME, id.to_string())
                        .with_operation(RepositoryOperation::Update))
                }
            },
        };

        tracker.modify(E::TYPE_NAME, id, row, stored);
        debug!(entity = E::TYPE_NAME, id, "Staged update");
        Ok(())
    }

    async fn stage_remove(&self, entity: E) -> RepositoryResult<()> {
        let mut tracker = self.tracker.lock().await;
        let id = entity.id();

        let stored = match tracker.get(E::TYPE_NAME, id) {
            Some(_) => None,
            None => match self.database.row(E::TYPE_NAME, id).await {
                Some(stored) => Some(stored),
                None => {
                    return Err(RepositoryError::not_found(E::TYPE_NAME, id.to_string())
                        .with_operation(RepositoryOperation::Delete))
                }
            },
        };

        tracker.remove(E::TYPE_NAME, id, stored);
        debug!(entity = E::TYPE_NAME, id, "Staged removal");
        Ok(())
    }

    async fn execute_update(&self, filters: Vec<Predicate<E>>, patch: Patch<E>) -> RepositoryResult<u64> {
        let mut journal = self.journal.lock().await;
        let mut tables = self.database.tables.write().await;

        let mut changed = Vec::new();
        if let Some(table) = tables.get(E::TYPE_NAME) {
            for (id, stored) in &table.rows {
                let mut entity: E = from_bag(stored, RepositoryOperation::BulkUpdate)?;
                if !filters.iter().all(|f| f(&entity)) {
                    continue;
                }
                patch(&mut entity);
                entity.set_id(*id);
                let mut row = to_bag(&entity, RepositoryOperation::BulkUpdate)?;
                stamp(&mut row);
                changed.push((*id, row));
            }
        }

        let count = changed.len() as u64;
        for (id, row) in changed {
            put(&mut tables, &mut journal, E::TYPE_NAME, id, Some(row));
        }
        debug!(entity = E::TYPE_NAME, rows = count, "Bulk update");
        Ok(count)
    }

    async fn execute_delete(&self, filters: Vec<Predicate<E>>) -> RepositoryResult<u64> {
        let mut journal = self.journal.lock().await;
        let mut tables = self.database.tables.write().await;

        let mut doomed = Vec::new();
        if let Some(table) = tables.get(E::TYPE_NAME) {
            for (id, stored) in &table.rows {
                let entity: E = from_bag(stored, RepositoryOperation::BulkDelete)?;
                if filters.iter().all(|f| f(&entity)) {
                    doomed.push(*id);
                }
            }
        }

        let count = doomed.len() as u64;
        for id in doomed {
            put(&mut tables, &mut journal, E::TYPE_NAME, id, None);
        }
        debug!(entity = E::TYPE_NAME, rows = count, "Bulk delete");
        Ok(count)
    }
}

impl DataContext for MemoryContext {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> RepositoryResult<MemoryTransaction> {
        let mut journal = self.journal.lock().await;
        if journal.is_some() {
            return Err(RepositoryError::transaction_failed(
                "A transaction is already open on this context",
            ));
        }

        let id = Uuid::new_v4();
        *journal = Some(Journal {
            transaction: id,
            undo: Vec::new(),
        });
        debug!(transaction = %id, "Memory transaction opened");
        Ok(MemoryTransaction { id })
    }

    async fn commit_transaction(&self, transaction: &MemoryTransaction) -> RepositoryResult<()> {
        let mut journal = self.journal.lock().await;
        match journal.take() {
            Some(open) if open.transaction == transaction.id => {
                debug!(transaction = %transaction.id, writes = open.undo.len(), "Memory transaction committed");
                Ok(())
            }
            other => {
                *journal = other;
                Err(RepositoryError::transaction_failed(
                    "Transaction is not open on this context",
                ))
            }
        }
    }

    async fn rollback_transaction(&self, transaction: &MemoryTransaction) -> RepositoryResult<()> {
        let mut tracker = self.tracker.lock().await;
        let mut journal = self.journal.lock().await;
        let open = match journal.take() {
            Some(open) if open.transaction == transaction.id => open,
            other => {
                *journal = other;
                return Err(RepositoryError::transaction_failed(
                    "Transaction is not open on this context",
                ));
            }
        };

        let mut tables = self.database.tables.write().await;
        let writes = open.undo.len();
        for undo in open.undo.into_iter().rev() {
            let rows = &mut tables.entry(undo.table).or_default().rows;
            match undo.previous {
                Some(row) => {
                    rows.insert(undo.id, row);
                }
                None => {
                    rows.remove(&undo.id);
                }
            }
        }
        tracker.clear();
        debug!(transaction = %transaction.id, writes, "Memory transaction rolled back");
        Ok(())
    }

    async fn save_changes(&self) -> Result<usize, SaveError> {
        let mut tracker = self.tracker.lock().await;
        let mut journal = self.journal.lock().await;
        let mut tables = self.database.tables.write().await;

        let conflicts: Vec<ConflictEntry> = tracker
            .pending()
            .filter(|(_, entry)| matches!(entry.state, EntryState::Modified | EntryState::Deleted))
            .filter_map(|((table, id), entry)| {
                let stored = tables.get(table).and_then(|t| t.rows.get(id));
                let stored_version = stored.and_then(|row| row.get(VERSION_KEY));
                if stored.is_some() && stored_version == entry.original.get(VERSION_KEY) {
                    return None;
                }
                Some(ConflictEntry {
                    entity_type: table.clone(),
                    entity_id: *id,
                    original: entry.original.clone(),
                    current: entry.current.clone(),
                    stored: stored.cloned(),
                })
            })
            .collect();

        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "Version check failed, nothing written");
            return Err(SaveError::Conflict(conflicts));
        }

        let mut written = 0;
        for ((table, id), entry) in tracker.pending_mut() {
            match entry.state {
                EntryState::Added | EntryState::Modified => {
                    stamp(&mut entry.current);
                    let mut row = entry.current.clone();
                    if let Some(stored) = tables.get(table).and_then(|t| t.rows.get(id)) {
                        for name in &entry.unloaded {
                            if entry.current.get(name) != entry.original.get(name) {
                                continue;
                            }
                            if let Some(value) = stored.get(name) {
                                row.insert(name.clone(), value.clone());
                            }
                        }
                    }
                    put(&mut tables, &mut journal, table, *id, Some(row));
                }
                EntryState::Deleted => put(&mut tables, &mut journal, table, *id, None),
                EntryState::Unchanged => continue,
            }
            written += 1;
        }
        tracker.accept_all();

        debug!(rows = written, "Saved changes");
        Ok(written)
    }

    async fn apply_resolution(&self, resolved: Vec<ConflictEntry>) -> RepositoryResult<()> {
        let mut tracker = self.tracker.lock().await;
        for entry in resolved {
            let (entity_type, entity_id) = (entry.entity_type.clone(), entry.entity_id);
            if !tracker.resolve(entry) {
                warn!(entity = %entity_type, id = entity_id, "Resolved entity is no longer tracked");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::BaseRepository;
    use crate::testing::{device, registry, Device, DeviceKind, Reading, Status};
    use crate::unit_of_work::{CommitOutcome, UnitOfWork};

    fn repository(context: &Arc<MemoryContext>) -> BaseRepository<MemoryContext, Device> {
        BaseRepository::new(context.clone(), registry())
    }

    async fn seeded() -> (Arc<MemoryDatabase>, EntityId) {
        let database = Arc::new(MemoryDatabase::new());
        let sample = database
            .seed(device("sample", DeviceKind::Sensor, Status::Active, Some(20.0), Some("Oslo")))
            .await
            .unwrap();
        (database, sample.base.id)
    }

    #[tokio::test]
    async fn test_staged_insert_is_invisible_until_saved() {
        let database = Arc::new(MemoryDatabase::new());
        let context = Arc::new(MemoryContext::new(database.clone()));
        let repository = repository(&context);

        let added = repository
            .add(device("a", DeviceKind::Actuator, Status::Active, None, None))
            .await
            .unwrap();
        assert_eq!(added.base.id, 1);
        assert_eq!(database.row_count("Device").await, 0);

        let outcome = UnitOfWork::new(context.clone()).commit().await.unwrap();
        assert_eq!(outcome, CommitOutcome::Saved(1));
        let row = database.row("Device", 1).await.unwrap();
        assert_eq!(row["name"], "a");
        assert_ne!(row[VERSION_KEY], JsonValue::String(Uuid::nil().to_string()));
    }

    #[tokio::test]
    async fn test_tracked_fetch_returns_staged_values() {
        let (database, id) = seeded().await;
        let context = Arc::new(MemoryContext::new(database));
        let repository = repository(&context);

        let mut sample = repository.get_by_id_or_not_found(id, true).await.unwrap();
        sample.name = "renamed".into();
        repository.update(sample).await.unwrap();

        let tracked = repository.get_by_id_or_not_found(id, true).await.unwrap();
        let untracked = repository.get_by_id_or_not_found(id, false).await.unwrap();
        assert_eq!(tracked.name, "renamed");
        assert_eq!(untracked.name, "sample");
        assert_eq!(context.tracked_count().await, 1);
    }

    // Another writer changed a field this context never touched; the merge
    // keeps both edits and the single retry succeeds.
    #[tokio::test]
    async fn test_conflict_merges_untouched_fields_and_retries() {
        let (database, id) = seeded().await;
        let ours = Arc::new(MemoryContext::new(database.clone()));
        let theirs = Arc::new(MemoryContext::new(database.clone()));

        let mut mine = repository(&ours).get_by_id_or_not_found(id, true).await.unwrap();
        let mut other = repository(&theirs).get_by_id_or_not_found(id, true).await.unwrap();

        other.temperature = Some(35.0);
        repository(&theirs).update(other).await.unwrap();
        let outcome = UnitOfWork::new(theirs.clone()).commit().await.unwrap();
        assert_eq!(outcome, CommitOutcome::Saved(1));

        mine.name = "renamed".into();
        repository(&ours).update(mine).await.unwrap();
        let outcome = UnitOfWork::new(ours.clone()).commit().await.unwrap();
        assert_eq!(outcome, CommitOutcome::Merged(1));

        let stored = repository(&ours).get_by_id_or_not_found(id, false).await.unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.temperature, Some(35.0));

        let tracked = repository(&ours).get_by_id_or_not_found(id, true).await.unwrap();
        assert_eq!(tracked.temperature, Some(35.0));
        assert_eq!(tracked.base.version, stored.base.version);
    }

    #[tokio::test]
    async fn test_update_of_deleted_row_is_abandoned() {
        let (database, id) = seeded().await;
        let ours = Arc::new(MemoryContext::new(database.clone()));
        let theirs = Arc::new(MemoryContext::new(database.clone()));

        let mut mine = repository(&ours).get_by_id_or_not_found(id, true).await.unwrap();
        repository(&theirs).remove_by_id(id).await.unwrap();
        let _ = UnitOfWork::new(theirs).commit().await.unwrap();

        mine.name = "too late".into();
        repository(&ours).update(mine).await.unwrap();
        let outcome = UnitOfWork::new(ours).commit().await.unwrap();
        assert_eq!(outcome, CommitOutcome::Abandoned);
        assert_eq!(database.row_count("Device").await, 0);
    }

    #[tokio::test]
    async fn test_rollback_restores_rows_and_detaches_entities() {
        let (database, id) = seeded().await;
        let context = Arc::new(MemoryContext::new(database.clone()));
        let repository = repository(&context);
        let uow = UnitOfWork::new(context.clone());

        uow.start_transaction().await.unwrap();
        repository
            .add(device("temp", DeviceKind::Actuator, Status::Active, None, None))
            .await
            .unwrap();
        repository.remove_by_id(id).await.unwrap();
        let _ = uow.commit().await.unwrap();
        assert_eq!(database.row_count("Device").await, 1);
        assert!(database.row("Device", id).await.is_none());

        uow.rollback_transaction().await.unwrap();
        assert_eq!(database.row_count("Device").await, 1);
        assert_eq!(database.row("Device", id).await.unwrap()["name"], "sample");
        assert_eq!(context.tracked_count().await, 0);
        assert!(!context.in_transaction().await);
    }

    #[tokio::test]
    async fn test_second_begin_on_same_context_fails() {
        let context = MemoryContext::new(Arc::new(MemoryDatabase::new()));
        let transaction = context.begin_transaction().await.unwrap();
        assert!(context.begin_transaction().await.is_err());
        context.commit_transaction(&transaction).await.unwrap();
        assert!(context.commit_transaction(&transaction).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_update_regenerates_versions() {
        let (database, id) = seeded().await;
        let before = database.row("Device", id).await.unwrap();
        let context = Arc::new(MemoryContext::new(database.clone()));

        let changed = repository(&context)
            .execute_update_by_id(
                id,
                crate::repository::patch(|d: &mut Device| d.status = Status::Retired),
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let after = database.row("Device", id).await.unwrap();
        assert_eq!(after["status"], "Retired");
        assert_ne!(after[VERSION_KEY], before[VERSION_KEY]);
    }

    #[tokio::test]
    async fn test_untracked_update_of_missing_row_is_not_found() {
        let context = Arc::new(MemoryContext::new(Arc::new(MemoryDatabase::new())));
        let mut ghost = device("ghost", DeviceKind::Sensor, Status::Active, None, None);
        ghost.base.id = 99;

        let err = repository(&context).update(ghost).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::Update);
    }

    #[tokio::test]
    async fn test_fetch_records_plan_shape() {
        let (database, _) = seeded().await;
        let context = Arc::new(MemoryContext::new(database));
        let repository = repository(&context).with_required_includes(["readings"]);

        repository.get_all_by(crate::repository::predicate(|_: &Device| true), false)
            .await
            .unwrap();

        let summary = context.last_fetch().await.unwrap();
        assert_eq!(summary.entity, "Device");
        assert!(summary.includes.contains("readings"));
        assert!(summary.split_query);
        assert!(!summary.tracking);
    }

    async fn with_readings() -> (Arc<MemoryDatabase>, EntityId) {
        let database = Arc::new(MemoryDatabase::new());
        let mut sample = device("sample", DeviceKind::Sensor, Status::Active, Some(20.0), Some("Oslo"));
        sample.readings = vec![Reading { value: 19.5 }, Reading { value: 20.5 }];
        let sample = database.seed(sample).await.unwrap();
        (database, sample.base.id)
    }

    #[tokio::test]
    async fn test_relations_load_only_when_included() {
        let (database, id) = with_readings().await;
        let context = Arc::new(MemoryContext::new(database));

        let bare = repository(&context).get_by_id_or_not_found(id, false).await.unwrap();
        assert!(bare.readings.is_empty());
        assert!(bare.location.is_none());
        assert_eq!(bare.settings, serde_json::json!({ "firmware": "1.0" }));

        let loaded = repository(&context)
            .with_required_includes(["readings"])
            .get_by_id_or_not_found(id, false)
            .await
            .unwrap();
        assert_eq!(loaded.readings, vec![Reading { value: 19.5 }, Reading { value: 20.5 }]);
        assert!(loaded.location.is_none());
    }

    #[tokio::test]
    async fn test_filters_see_unincluded_relations() {
        let (database, _) = with_readings().await;
        let context = Arc::new(MemoryContext::new(database));

        let rows = repository(&context)
            .get_all_by(
                crate::repository::predicate(|d: &Device| {
                    d.location.as_ref().is_some_and(|l| l.city == "Oslo")
                }),
                false,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].location.is_none());
    }

    #[tokio::test]
    async fn test_tracked_update_keeps_unincluded_relations() {
        let (database, id) = with_readings().await;
        let context = Arc::new(MemoryContext::new(database.clone()));
        let repository = repository(&context);
        let before = database.row("Device", id).await.unwrap();

        let mut sample = repository.get_by_id_or_not_found(id, true).await.unwrap();
        assert!(sample.readings.is_empty());
        sample.name = "renamed".into();
        repository.update(sample).await.unwrap();
        UnitOfWork::new(context.clone()).commit().await.unwrap();

        let after = database.row("Device", id).await.unwrap();
        assert_eq!(after["name"], "renamed");
        assert_eq!(after["readings"], before["readings"]);
        assert_eq!(after["location"], before["location"]);
    }

    #[tokio::test]
    async fn test_tracked_refetch_loads_newly_included_relation() {
        let (database, id) = with_readings().await;
        let context = Arc::new(MemoryContext::new(database));

        let first = repository(&context).get_by_id_or_not_found(id, true).await.unwrap();
        assert!(first.location.is_none());

        let again = repository(&context)
            .with_required_includes(["location"])
            .get_by_id_or_not_found(id, true)
            .await
            .unwrap();
        assert_eq!(again.location.map(|l| l.city).as_deref(), Some("Oslo"));
        assert!(again.readings.is_empty());
    }
}
