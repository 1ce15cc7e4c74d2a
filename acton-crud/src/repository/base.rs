use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::error::{RepositoryError, RepositoryOperation};
use super::traits::{patch, predicate, EntitySource, FetchPlan, Patch, Predicate, RepositoryResult};
use crate::entity::{Entity, EntityId, TypeRegistry, ID_KEY, VERSION_KEY};
use crate::processing::{
    skip_past_cursor, take_page, CompiledQuery, DataProcessing, IncludeSet, OrderBy,
    PaginationParam,
};
use crate::unit_of_work::PropertyBag;

/// Generic repository for one entity type
///
/// Every fetch merges the repository's required includes with the caller's.
/// Data-process methods compile the [`DataProcessing`] against the shared
/// [`TypeRegistry`] first, so a bad filter fails before the data context is
/// touched.
///
/// # Example
///
/// ```rust,ignore
/// let repository = BaseRepository::<MemoryContext, Device>::new(context, registry)
///     .with_required_includes(["location"]);
///
/// let active = repository
///     .get_all_with_data_process(&DataProcessing::default().filter(
///         FilterParam::new("status", FilterOperator::Equal).value("Active"),
///     ), false)
///     .await?;
/// ```
pub struct BaseRepository<C, E> {
    context: Arc<C>,
    registry: Arc<TypeRegistry>,
    required_includes: IncludeSet,
    _entity: PhantomData<fn() -> E>,
}

impl<C, E> Clone for BaseRepository<C, E> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            registry: Arc::clone(&self.registry),
            required_includes: self.required_includes.clone(),
            _entity: PhantomData,
        }
    }
}

impl<C, E> BaseRepository<C, E>
where
    C: EntitySource<E>,
    E: Entity,
{
    pub fn new(context: Arc<C>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            context,
            registry,
            required_includes: IncludeSet::new(),
            _entity: PhantomData,
        }
    }

    /// Relations loaded on every fetch
    #[must_use]
    pub fn with_required_includes<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.required_includes.insert(path);
        }
        self
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn required_includes(&self) -> &IncludeSet {
        &self.required_includes
    }

    fn compile(&self, data_processing: &DataProcessing) -> RepositoryResult<CompiledQuery> {
        data_processing
            .compile(E::TYPE_NAME, &self.registry, &self.required_includes)
            .map_err(|e| RepositoryError::invalid_specification(RepositoryOperation::FindAll, &e))
    }

    fn includes(&self, extra: &IncludeSet) -> RepositoryResult<IncludeSet> {
        self.required_includes
            .merged(extra)
            .resolve(E::TYPE_NAME, &self.registry)
            .map_err(|e| RepositoryError::invalid_specification(RepositoryOperation::FindAll, &e))
    }

    fn plan(&self, query: CompiledQuery, tracking: bool) -> FetchPlan<E> {
        let CompiledQuery {
            condition,
            order,
            includes,
        } = query;
        FetchPlan::new()
            .filter(predicate(move |row: &E| condition.evaluate(row)))
            .order_by(order)
            .include(includes)
            .tracked(tracking)
    }

    fn by_id(id: EntityId) -> Predicate<E> {
        predicate(move |row: &E| row.id() == id)
    }

    /// Entity with the given id, if any
    pub async fn get_by_id(&self, id: EntityId, tracking: bool) -> RepositoryResult<Option<E>> {
        let plan = FetchPlan::new()
            .filter(Self::by_id(id))
            .include(self.includes(&IncludeSet::new())?)
            .tracked(tracking)
            .limit(1);
        Ok(self.context.fetch(plan).await?.into_iter().next())
    }

    /// Entity with the given id
    ///
    /// # Errors
    ///
    /// [`RepositoryErrorKind::NotFound`](super::RepositoryErrorKind::NotFound)
    /// when no row has that id.
    pub async fn get_by_id_or_not_found(&self, id: EntityId, tracking: bool) -> RepositoryResult<E> {
        self.get_by_id(id, tracking)
            .await?
            .ok_or_else(|| RepositoryError::not_found(E::TYPE_NAME, id.to_string()))
    }

    /// First entity matching `filter`, if any
    pub async fn get_by(
        &self,
        filter: Predicate<E>,
        includes: &IncludeSet,
        tracking: bool,
    ) -> RepositoryResult<Option<E>> {
        let plan = FetchPlan::new()
            .filter(filter)
            .include(self.includes(includes)?)
            .tracked(tracking)
            .limit(1);
        Ok(self.context.fetch(plan).await?.into_iter().next())
    }

    pub async fn get_by_or_not_found(
        &self,
        filter: Predicate<E>,
        includes: &IncludeSet,
        tracking: bool,
    ) -> RepositoryResult<E> {
        self.get_by(filter, includes, tracking).await?.ok_or_else(|| {
            RepositoryError::new(
                RepositoryOperation::FindAll,
                super::RepositoryErrorKind::NotFound,
                "No entity matches the predicate",
            )
            .with_entity(E::TYPE_NAME, "*")
        })
    }

    /// First entity of the filtered, sorted data process
    pub async fn get_by_with_data_process(
        &self,
        data_processing: &DataProcessing,
        tracking: bool,
    ) -> RepositoryResult<E> {
        let plan = self.plan(self.compile(data_processing)?, tracking).limit(1);
        self.context.fetch(plan).await?.into_iter().next().ok_or_else(|| {
            RepositoryError::new(
                RepositoryOperation::FindAll,
                super::RepositoryErrorKind::NotFound,
                "No entity matches the data process",
            )
            .with_entity(E::TYPE_NAME, "*")
        })
    }

    /// Entities passing every filter, optionally ordered and capped
    pub async fn get_all(
        &self,
        filters: Vec<Predicate<E>>,
        order: Option<OrderBy>,
        tracking: bool,
        max_count: Option<usize>,
        includes: &IncludeSet,
    ) -> RepositoryResult<Vec<E>> {
        let mut plan = FetchPlan::new()
            .filters(filters)
            .include(self.includes(includes)?)
            .tracked(tracking);
        plan.order = order;
        plan.limit = max_count;
        self.context.fetch(plan).await
    }

    /// Includes, then filters, then sort; no cursor
    pub async fn get_all_with_data_process(
        &self,
        data_processing: &DataProcessing,
        tracking: bool,
    ) -> RepositoryResult<Vec<E>> {
        let plan = self.plan(self.compile(data_processing)?, tracking);
        self.context.fetch(plan).await
    }

    /// One page after the cursor; a negative `page_size` returns every remaining row
    pub async fn get_with_pagination(
        &self,
        pagination: &PaginationParam,
        page_size: i64,
    ) -> RepositoryResult<Vec<E>> {
        let rows = self
            .get_all_with_data_process(&pagination.data_processing, false)
            .await?;
        let rows = skip_past_cursor(rows, pagination.last_value_id);
        debug!(
            entity = E::TYPE_NAME,
            cursor = ?pagination.last_value_id,
            remaining = rows.len(),
            page_size,
            "Paginating"
        );
        Ok(take_page(rows, page_size))
    }

    /// Number of rows remaining after the cursor
    pub async fn count_with_pagination(&self, pagination: &PaginationParam) -> RepositoryResult<u64> {
        let rows = self
            .get_all_with_data_process(&pagination.data_processing, false)
            .await?;
        Ok(skip_past_cursor(rows, pagination.last_value_id).len() as u64)
    }

    /// Every entity matching `filter`
    pub async fn get_all_by(&self, filter: Predicate<E>, tracking: bool) -> RepositoryResult<Vec<E>> {
        let plan = FetchPlan::new()
            .filter(filter)
            .include(self.includes(&IncludeSet::new())?)
            .tracked(tracking);
        self.context.fetch(plan).await
    }

    /// Stage an insert and return the entity with its assigned id
    pub async fn add(&self, entity: E) -> RepositoryResult<E> {
        self.context.stage_add(entity).await
    }

    pub async fn add_range(&self, entities: Vec<E>) -> RepositoryResult<Vec<E>> {
        let mut added = Vec::with_capacity(entities.len());
        for entity in entities {
            added.push(self.context.stage_add(entity).await?);
        }
        Ok(added)
    }

    pub async fn update(&self, entity: E) -> RepositoryResult<()> {
        self.context.stage_update(entity).await
    }

    pub async fn update_range(&self, entities: Vec<E>) -> RepositoryResult<()> {
        for entity in entities {
            self.context.stage_update(entity).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, entity: E) -> RepositoryResult<()> {
        self.context.stage_remove(entity).await
    }

    /// Stage removal of the entity with `id`
    ///
    /// # Errors
    ///
    /// Not found when no row has that id.
    pub async fn remove_by_id(&self, id: EntityId) -> RepositoryResult<()> {
        let entity = self
            .get_by_id_or_not_found(id, true)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::Delete))?;
        self.context.stage_remove(entity).await
    }

    pub async fn remove_range(&self, entities: Vec<E>) -> RepositoryResult<()> {
        for entity in entities {
            self.context.stage_remove(entity).await?;
        }
        Ok(())
    }

    /// Delete every row whose timestamp is older than `lifespan`
    pub async fn remove_by_lifespan(&self, lifespan: Duration) -> RepositoryResult<u64> {
        let cutoff = Utc::now() - lifespan;
        let removed = self
            .execute_delete(predicate(move |row: &E| row.timestamp() < cutoff))
            .await?;
        debug!(entity = E::TYPE_NAME, %cutoff, removed, "Removed expired rows");
        Ok(removed)
    }

    pub async fn execute_update_by_id(&self, id: EntityId, change: Patch<E>) -> RepositoryResult<u64> {
        self.execute_update(Self::by_id(id), change).await
    }

    pub async fn execute_update(&self, filter: Predicate<E>, change: Patch<E>) -> RepositoryResult<u64> {
        self.context.execute_update(vec![filter], change).await
    }

    /// Overwrite the scalar columns of the row sharing `entity`'s id
    ///
    /// The id and version stay as stored. Json documents and relations are
    /// left untouched, so a model rebuilt from a DTO cannot blank them.
    pub async fn execute_update_entity(&self, entity: E) -> RepositoryResult<u64> {
        let id = entity.id();
        let columns: Vec<&'static str> = self
            .registry
            .scalar_fields(entity.type_name())
            .into_iter()
            .filter(|name| *name != ID_KEY && *name != VERSION_KEY)
            .collect();
        let source = match serde_json::to_value(&entity) {
            Ok(JsonValue::Object(source)) => source,
            Ok(_) => {
                return Err(RepositoryError::serialization_error(
                    RepositoryOperation::BulkUpdate,
                    "Entity did not serialize to an object",
                )
                .with_entity(E::TYPE_NAME, id.to_string()))
            }
            Err(e) => {
                return Err(
                    RepositoryError::serialization_error(RepositoryOperation::BulkUpdate, e.to_string())
                        .with_entity(E::TYPE_NAME, id.to_string()),
                )
            }
        };

        self.execute_update_by_id(
            id,
            patch(move |row: &mut E| overwrite_columns(row, &source, &columns)),
        )
        .await
    }

    pub async fn execute_delete(&self, filter: Predicate<E>) -> RepositoryResult<u64> {
        self.context.execute_delete(vec![filter]).await
    }

    pub async fn any_predicate(&self, filter: Predicate<E>) -> RepositoryResult<bool> {
        Ok(self.context.count(vec![filter]).await? > 0)
    }

    pub async fn any(&self) -> RepositoryResult<bool> {
        Ok(self.context.count(Vec::new()).await? > 0)
    }
}

fn overwrite_columns<E: Entity>(row: &mut E, source: &PropertyBag, columns: &[&'static str]) {
    let mut target = match serde_json::to_value(&*row) {
        Ok(JsonValue::Object(target)) => target,
        _ => {
            warn!(entity = E::TYPE_NAME, id = row.id(), "Row did not serialize, left unchanged");
            return;
        }
    };
    for column in columns {
        if let Some(value) = source.get(*column) {
            target.insert((*column).to_string(), value.clone());
        }
    }
    match serde_json::from_value(JsonValue::Object(target)) {
        Ok(updated) => *row = updated,
        Err(e) => warn!(entity = E::TYPE_NAME, id = row.id(), error = %e, "Overwritten row did not deserialize, left unchanged"),
    }
}
