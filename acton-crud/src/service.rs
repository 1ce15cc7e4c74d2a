//! DTO-facing service over one repository and its unit of work
//!
//! Reads map entities to their [`Dto`]; writes that touch more than one row
//! run inside [`UnitOfWork::with_transaction`], so a failure part way through
//! leaves storage as it was.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::config::DataConfig;
use crate::entity::{Dto, Entity, EntityId, TypeRegistry};
use crate::processing::{DataProcessing, IncludeSet, PaginationParam};
use crate::repository::{
    BaseRepository, EntitySource, RepositoryError, RepositoryOperation, RepositoryResult,
};
use crate::unit_of_work::{DataContext, UnitOfWork};

/// Builds a service with its own context and unit of work on every call
pub type ServiceFactory<C, E> = Arc<dyn Fn() -> BaseService<C, E> + Send + Sync>;

pub struct BaseService<C: DataContext, E> {
    repository: BaseRepository<C, E>,
    unit_of_work: Arc<UnitOfWork<C>>,
}

impl<C: DataContext, E> Clone for BaseService<C, E> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            unit_of_work: Arc::clone(&self.unit_of_work),
        }
    }
}

impl<C, E> BaseService<C, E>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    pub fn new(repository: BaseRepository<C, E>, unit_of_work: Arc<UnitOfWork<C>>) -> Self {
        Self {
            repository,
            unit_of_work,
        }
    }

    /// Service with a fresh repository and unit of work over `context`
    pub fn from_context(context: Arc<C>, registry: Arc<TypeRegistry>) -> Self {
        let unit_of_work = Arc::new(UnitOfWork::new(Arc::clone(&context)));
        Self::new(BaseRepository::new(context, registry), unit_of_work)
    }

    /// Like [`from_context`](Self::from_context), loading the relations
    /// configured for `E` under `data.required_includes`
    pub fn from_config(context: Arc<C>, registry: Arc<TypeRegistry>, config: &DataConfig) -> Self {
        let unit_of_work = Arc::new(UnitOfWork::new(Arc::clone(&context)));
        let includes = config.required_includes_for(E::TYPE_NAME);
        let repository = BaseRepository::new(context, registry).with_required_includes(includes.iter());
        Self::new(repository, unit_of_work)
    }

    /// Factory handing out one [`from_config`](Self::from_config) service
    /// per call, each over a context returned by `make_context`
    ///
    /// Transaction depth lives in the unit of work, so callers that run
    /// independently (one per HTTP request, say) must not share a service.
    pub fn factory<F>(make_context: F, registry: Arc<TypeRegistry>, config: DataConfig) -> ServiceFactory<C, E>
    where
        F: Fn() -> Arc<C> + Send + Sync + 'static,
        C: 'static,
        E: 'static,
    {
        Arc::new(move || Self::from_config(make_context(), Arc::clone(&registry), &config))
    }

    pub fn repository(&self) -> &BaseRepository<C, E> {
        &self.repository
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork<C>> {
        &self.unit_of_work
    }

    /// # Errors
    ///
    /// Not found when no row has `id`.
    pub async fn get_by_id(&self, id: EntityId) -> RepositoryResult<E::Dto> {
        Ok(self.repository.get_by_id_or_not_found(id, false).await?.to_dto())
    }

    pub async fn get_by_with_data_process(
        &self,
        data_processing: &DataProcessing,
    ) -> RepositoryResult<E::Dto> {
        Ok(self
            .repository
            .get_by_with_data_process(data_processing, false)
            .await?
            .to_dto())
    }

    pub async fn get_all(&self) -> RepositoryResult<Vec<E::Dto>> {
        let rows = self
            .repository
            .get_all(Vec::new(), None, false, None, &IncludeSet::new())
            .await?;
        Ok(rows.iter().map(Entity::to_dto).collect())
    }

    pub async fn get_all_with_data_process(
        &self,
        data_processing: &DataProcessing,
    ) -> RepositoryResult<Vec<E::Dto>> {
        let rows = self
            .repository
            .get_all_with_data_process(data_processing, false)
            .await?;
        Ok(rows.iter().map(Entity::to_dto).collect())
    }

    pub async fn get_with_pagination(
        &self,
        pagination: &PaginationParam,
        page_size: i64,
    ) -> RepositoryResult<Vec<E::Dto>> {
        let rows = self
            .repository
            .get_with_pagination(pagination, page_size)
            .await?;
        Ok(rows.iter().map(Entity::to_dto).collect())
    }

    pub async fn count_with_pagination(&self, pagination: &PaginationParam) -> RepositoryResult<u64> {
        self.repository.count_with_pagination(pagination).await
    }

    pub async fn add(&self, dto: E::Dto) -> RepositoryResult<E::Dto> {
        let repository = &self.repository;
        let added = self
            .unit_of_work
            .with_transaction(|| async move { repository.add(dto.into_model()).await })
            .await?;
        info!(entity = E::TYPE_NAME, id = added.id(), "Added");
        Ok(added.to_dto())
    }

    pub async fn add_all(&self, dtos: Vec<E::Dto>) -> RepositoryResult<Vec<E::Dto>> {
        let repository = &self.repository;
        let added = self
            .unit_of_work
            .with_transaction(|| async move {
                repository
                    .add_range(dtos.into_iter().map(|dto| dto.into_model()).collect())
                    .await
            })
            .await?;
        info!(entity = E::TYPE_NAME, count = added.len(), "Added range");
        Ok(added.iter().map(Entity::to_dto).collect())
    }

    /// Overwrite the stored row with the DTO's values and return the result
    ///
    /// # Errors
    ///
    /// Not found when no row has the DTO's id.
    pub async fn update(&self, dto: E::Dto) -> RepositoryResult<E::Dto> {
        let entity = dto.into_model();
        let id = entity.id();
        let changed = self.repository.execute_update_entity(entity).await?;
        if changed == 0 {
            return Err(RepositoryError::not_found(E::TYPE_NAME, id.to_string())
                .with_operation(RepositoryOperation::Update));
        }
        self.get_by_id(id).await
    }

    /// Load the entity tracked, let `adapt` change it, and save
    ///
    /// Concurrent edits to other fields are merged by the unit of work.
    pub async fn update_transaction<F>(&self, id: EntityId, adapt: F) -> RepositoryResult<E::Dto>
    where
        F: FnOnce(&mut E) + Send,
    {
        let repository = &self.repository;
        let updated = self
            .unit_of_work
            .with_transaction(|| async move {
                let mut entity = repository.get_by_id_or_not_found(id, true).await?;
                adapt(&mut entity);
                repository.update(entity.clone()).await?;
                Ok(entity)
            })
            .await?;
        Ok(updated.to_dto())
    }

    /// [`update`](Self::update) every DTO, all or none
    ///
    /// # Errors
    ///
    /// Not found when any DTO's id has no row; no row is changed then.
    pub async fn update_all(&self, dtos: Vec<E::Dto>) -> RepositoryResult<Vec<E::Dto>> {
        let repository = &self.repository;
        let ids = self
            .unit_of_work
            .with_transaction(|| async move {
                let mut ids = Vec::with_capacity(dtos.len());
                for dto in dtos {
                    let entity = dto.into_model();
                    let id = entity.id();
                    if repository.execute_update_entity(entity).await? == 0 {
                        return Err(RepositoryError::not_found(E::TYPE_NAME, id.to_string())
                            .with_operation(RepositoryOperation::Update));
                    }
                    ids.push(id);
                }
                Ok(ids)
            })
            .await?;
        info!(entity = E::TYPE_NAME, count = ids.len(), "Updated range");

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.get_by_id(id).await?);
        }
        Ok(updated)
    }

    /// # Errors
    ///
    /// Not found when no row has `id`.
    pub async fn remove(&self, id: EntityId) -> RepositoryResult<()> {
        let repository = &self.repository;
        self.unit_of_work
            .with_transaction(|| async move { repository.remove_by_id(id).await })
            .await?;
        info!(entity = E::TYPE_NAME, id, "Removed");
        Ok(())
    }

    /// Remove every id or none of them
    pub async fn remove_all(&self, ids: Vec<EntityId>) -> RepositoryResult<()> {
        let repository = &self.repository;
        let count = ids.len();
        self.unit_of_work
            .with_transaction(|| async move {
                for id in ids {
                    repository.remove_by_id(id).await?;
                }
                Ok(())
            })
            .await?;
        info!(entity = E::TYPE_NAME, count, "Removed range");
        Ok(())
    }

    pub async fn remove_by_lifespan(&self, lifespan: Duration) -> RepositoryResult<u64> {
        self.repository.remove_by_lifespan(lifespan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryContext, MemoryDatabase};
    use crate::processing::{FilterOperator, FilterParam};
    use crate::testing::{device, registry, Device, DeviceKind, Reading, Status};

    type Devices = BaseService<MemoryContext, Device>;

    async fn seeded() -> Arc<MemoryDatabase> {
        let database = Arc::new(MemoryDatabase::new());
        let mut alpha = device("alpha", DeviceKind::Sensor, Status::Active, Some(10.0), Some("Oslo"));
        alpha.readings = vec![Reading { value: 9.5 }, Reading { value: 10.5 }];
        database.seed(alpha).await.unwrap();
        database
            .seed(device("beta", DeviceKind::Actuator, Status::Inactive, None, None))
            .await
            .unwrap();
        database
    }

    fn config() -> DataConfig {
        let mut config = DataConfig::default();
        config
            .required_includes
            .insert("device".to_string(), vec!["location".to_string()]);
        config
    }

    async fn service() -> (Arc<MemoryDatabase>, Devices) {
        let database = seeded().await;
        let context = Arc::new(MemoryContext::new(database.clone()));
        (database, BaseService::from_config(context, registry(), &config()))
    }

    #[tokio::test]
    async fn test_add_then_read_back_dto() {
        let (database, service) = service().await;
        let dto = device("gamma", DeviceKind::Sensor, Status::Active, Some(1.5), Some("Bergen")).to_dto();

        let added = service.add(dto).await.unwrap();
        assert_eq!(added.base.id, 3);
        assert_eq!(database.row_count("Device").await, 3);

        let read = service.get_by_id(3).await.unwrap();
        assert_eq!(read.name, "gamma");
        assert_eq!(read.city.as_deref(), Some("Bergen"));
        assert_eq!(service.unit_of_work().transaction_depth().await, 0);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let (_, service) = service().await;
        let mut dto = device("ghost", DeviceKind::Sensor, Status::Active, None, None).to_dto();
        dto.base.id = 42;

        let err = service.update(dto).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::Update);
    }

    #[tokio::test]
    async fn test_update_overwrites_row() {
        let (_, service) = service().await;
        let mut dto = service.get_by_id(2).await.unwrap();
        dto.status = Status::Retired;

        let updated = service.update(dto).await.unwrap();
        assert_eq!(updated.status, Status::Retired);
        assert_eq!(updated.base.id, 2);
    }

    #[tokio::test]
    async fn test_update_keeps_documents_and_relations() {
        let (database, service) = service().await;
        let before = database.row("Device", 1).await.unwrap();

        let mut dto = service.get_by_id(1).await.unwrap();
        dto.name = "alpha-renamed".into();
        let updated = service.update(dto).await.unwrap();
        assert_eq!(updated.name, "alpha-renamed");
        assert_eq!(updated.city.as_deref(), Some("Oslo"));

        let after = database.row("Device", 1).await.unwrap();
        assert_eq!(after["name"], "alpha-renamed");
        assert_eq!(after["settings"], serde_json::json!({ "firmware": "1.0" }));
        assert_eq!(after["location"], before["location"]);
        assert_eq!(after["readings"], before["readings"]);
        assert_eq!(after["readings"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_update_all_keeps_documents_and_is_atomic() {
        let (database, service) = service().await;
        let before = database.row("Device", 1).await.unwrap();

        let mut alpha = service.get_by_id(1).await.unwrap();
        alpha.status = Status::Retired;
        let mut ghost = device("ghost", DeviceKind::Sensor, Status::Active, None, None).to_dto();
        ghost.base.id = 42;
        let err = service.update_all(vec![alpha.clone(), ghost]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::Update);
        assert_eq!(database.row("Device", 1).await.unwrap()["status"], before["status"]);

        let mut beta = service.get_by_id(2).await.unwrap();
        beta.name = "beta-2".into();
        let updated = service.update_all(vec![alpha, beta]).await.unwrap();
        assert_eq!(updated[0].status, Status::Retired);
        assert_eq!(updated[1].name, "beta-2");

        let after = database.row("Device", 1).await.unwrap();
        assert_eq!(after["settings"], before["settings"]);
        assert_eq!(after["location"], before["location"]);
        assert_eq!(after["readings"], before["readings"]);
        assert_eq!(service.unit_of_work().transaction_depth().await, 0);
    }

    #[tokio::test]
    async fn test_factory_services_do_not_share_transactions() {
        let database = seeded().await;
        let shared = database.clone();
        let factory: ServiceFactory<MemoryContext, Device> = BaseService::factory(
            move || Arc::new(MemoryContext::new(shared.clone())),
            registry(),
            config(),
        );
        let a = factory();
        let b = factory();

        a.unit_of_work().start_transaction().await.unwrap();
        a.repository().remove_by_id(2).await.unwrap();
        a.unit_of_work().commit().await.unwrap();

        let gamma = device("gamma", DeviceKind::Sensor, Status::Active, Some(3.0), None).to_dto();
        let added = b.add(gamma).await.unwrap();
        assert_eq!(added.base.id, 3);
        assert_eq!(b.unit_of_work().transaction_depth().await, 0);

        a.unit_of_work().rollback_transaction().await.unwrap();
        assert_eq!(database.row_count("Device").await, 3);
        assert_eq!(database.row("Device", 3).await.unwrap()["name"], "gamma");
        assert!(database.row("Device", 2).await.is_some());
    }

    #[tokio::test]
    async fn test_update_transaction_applies_change() {
        let (database, service) = service().await;
        let before = database.row("Device", 1).await.unwrap();

        let updated = service
            .update_transaction(1, |d: &mut Device| d.temperature = Some(99.0))
            .await
            .unwrap();
        assert_eq!(updated.temperature, Some(99.0));

        let after = database.row("Device", 1).await.unwrap();
        assert_eq!(after["temperature"], 99.0);
        assert_ne!(after["version"], before["version"]);
    }

    #[tokio::test]
    async fn test_remove_all_is_atomic() {
        let (database, service) = service().await;

        let err = service.remove_all(vec![1, 99]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(database.row_count("Device").await, 2);

        service.remove_all(vec![1, 2]).await.unwrap();
        assert_eq!(database.row_count("Device").await, 0);
    }

    #[tokio::test]
    async fn test_listing_with_data_process() {
        let (_, service) = service().await;
        let query = DataProcessing::default()
            .filter(FilterParam::new("status", FilterOperator::NotEqual).value("Active"));

        let rows = service.get_all_with_data_process(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "beta");

        assert_eq!(service.get_all().await.unwrap().len(), 2);
        let first = service.get_by_with_data_process(&DataProcessing::default()).await.unwrap();
        assert_eq!(first.name, "beta");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let (_, service) = service().await;
        assert!(service.remove(7).await.unwrap_err().is_not_found());
        service.remove(1).await.unwrap();
        assert!(service.get_by_id(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_from_config_applies_required_includes() {
        let database = Arc::new(MemoryDatabase::new());
        let context = Arc::new(MemoryContext::new(database));

        let service: Devices = BaseService::from_config(context.clone(), registry(), &config());
        assert!(service.repository().required_includes().contains("location"));

        service.get_all().await.unwrap();
        let summary = context.last_fetch().await.unwrap();
        assert!(summary.includes.contains("location"));
    }
}
