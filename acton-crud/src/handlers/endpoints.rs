//! Generic CRUD routes for one entity type
//!
//! [`EntityEndpoints::router`] mounts the routes selected by
//! [`EndpointFlags`] under `/{type name in lowercase}`:
//!
//! | Flag     | Method and path                   | Service call                |
//! |----------|-----------------------------------|-----------------------------|
//! | `CREATE` | `POST /`                          | `add`                       |
//! | `READ`   | `GET /`                           | `get_all`                   |
//! | `READ`   | `GET /{id}`                       | `get_by_id`                 |
//! | `READ`   | `PUT /`                           | `get_all_with_data_process` |
//! | `READ`   | `PUT /by`                         | `get_by_with_data_process`  |
//! | `READ`   | `PUT /pagination`                 | `count_with_pagination`     |
//! | `READ`   | `PUT /pagination/{nb_items}`      | `get_with_pagination`       |
//! | `UPDATE` | `PUT /update`                     | `update`                    |
//! | `DELETE` | `DELETE /{id}`                    | `remove`                    |
//!
//! Listings take a [`DataProcessing`] body and pages a [`PaginationParam`]
//! body. A malformed body is a 400, like any other rejected query.
//!
//! Every request runs on its own service from the [`ServiceFactory`], so one
//! request's open transaction never swallows another request's writes.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::info;

use super::error::{ApiError, ApiOperation};
use crate::entity::{Entity, EntityId};
use crate::processing::{DataProcessing, PaginationParam};
use crate::repository::EntitySource;
use crate::service::{BaseService, ServiceFactory};
use crate::unit_of_work::DataContext;

/// Which route groups to mount, plus call logging
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EndpointFlags(u8);

impl EndpointFlags {
    pub const NONE: Self = Self(0);
    /// `POST /`
    pub const CREATE: Self = Self(1);
    /// Every `GET` route plus the listing and pagination `PUT` routes
    pub const READ: Self = Self(1 << 1);
    /// `PUT /update`
    pub const UPDATE: Self = Self(1 << 2);
    /// `DELETE /{id}`
    pub const DELETE: Self = Self(1 << 3);
    /// All route groups, without call logging
    pub const ALL: Self = Self(Self::CREATE.0 | Self::READ.0 | Self::UPDATE.0 | Self::DELETE.0);
    /// Log every successful call at info level
    pub const TO_LOGS: Self = Self(1 << 4);

    /// Raw bit pattern, one bit per flag in declaration order
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag set in `other` is also set here
    ///
    /// `NONE` is contained in any value.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Union of two flag sets
impl BitOr for EndpointFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EndpointFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EndpointFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::CREATE, "CREATE"),
            (Self::READ, "READ"),
            (Self::UPDATE, "UPDATE"),
            (Self::DELETE, "DELETE"),
            (Self::TO_LOGS, "TO_LOGS"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "EndpointFlags({})", set.join(" | "))
    }
}

struct EndpointState<C: DataContext, E> {
    make_service: ServiceFactory<C, E>,
    log_calls: bool,
}

impl<C: DataContext, E> Clone for EndpointState<C, E> {
    fn clone(&self) -> Self {
        Self {
            make_service: Arc::clone(&self.make_service),
            log_calls: self.log_calls,
        }
    }
}

impl<C: DataContext, E: Entity> EndpointState<C, E> {
    /// A service private to the current request
    fn service(&self) -> BaseService<C, E> {
        (self.make_service)()
    }

    fn logged(&self, operation: ApiOperation) {
        if self.log_calls {
            info!(entity = E::TYPE_NAME, %operation, "Endpoint call succeeded");
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Route builder for entity `E` served through data context `C`
pub struct EntityEndpoints<C, E>(PhantomData<fn() -> (C, E)>);

impl<C, E> EntityEndpoints<C, E>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    /// `/` followed by the lowercase type name
    pub fn base_path() -> String {
        format!("/{}", E::TYPE_NAME.to_lowercase())
    }

    /// Routes selected by `flags`, each request served by a fresh service
    /// from `make_service`
    pub fn router<S>(make_service: ServiceFactory<C, E>, flags: EndpointFlags) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let base = Self::base_path();
        let by_id = format!("{base}/{{id}}");
        let mut router = Router::new();

        if flags.contains(EndpointFlags::CREATE) {
            router = router.route(&base, post(add::<C, E>));
        }

        if flags.contains(EndpointFlags::READ) {
            router = router
                .route(&base, get(get_all::<C, E>).put(get_all_with_data_process::<C, E>))
                .route(&by_id, get(get_by_id::<C, E>))
                .route(&format!("{base}/by"), put(get_by::<C, E>))
                .route(&format!("{base}/pagination"), put(count_with_pagination::<C, E>))
                .route(
                    &format!("{base}/pagination/{{nb_items}}"),
                    put(get_with_pagination::<C, E>),
                );
        }

        if flags.contains(EndpointFlags::UPDATE) {
            router = router.route(&format!("{base}/update"), put(update::<C, E>));
        }

        if flags.contains(EndpointFlags::DELETE) {
            router = router.route(&by_id, delete(remove::<C, E>));
        }

        router.with_state(EndpointState {
            make_service,
            log_calls: flags.contains(EndpointFlags::TO_LOGS),
        })
    }
}

async fn add<C, E>(
    State(state): State<EndpointState<C, E>>,
    payload: Result<Json<E::Dto>, JsonRejection>,
) -> Result<Json<E::Dto>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let dto = body(payload).map_err(|e| e.with_operation(ApiOperation::Create))?;
    let added = state.service().add(dto).await?;
    state.logged(ApiOperation::Create);
    Ok(Json(added))
}

async fn get_all<C, E>(State(state): State<EndpointState<C, E>>) -> Result<Json<Vec<E::Dto>>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let rows = state.service().get_all().await?;
    state.logged(ApiOperation::List);
    Ok(Json(rows))
}

async fn get_by_id<C, E>(
    State(state): State<EndpointState<C, E>>,
    Path(id): Path<EntityId>,
) -> Result<Json<E::Dto>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let dto = state.service().get_by_id(id).await?;
    state.logged(ApiOperation::Get);
    Ok(Json(dto))
}

async fn get_all_with_data_process<C, E>(
    State(state): State<EndpointState<C, E>>,
    payload: Result<Json<DataProcessing>, JsonRejection>,
) -> Result<Json<Vec<E::Dto>>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let data_processing = body(payload)?;
    let rows = state.service().get_all_with_data_process(&data_processing).await?;
    state.logged(ApiOperation::List);
    Ok(Json(rows))
}

async fn get_by<C, E>(
    State(state): State<EndpointState<C, E>>,
    payload: Result<Json<DataProcessing>, JsonRejection>,
) -> Result<Json<E::Dto>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let data_processing = body(payload)?;
    let dto = state.service().get_by_with_data_process(&data_processing).await?;
    state.logged(ApiOperation::Get);
    Ok(Json(dto))
}

async fn count_with_pagination<C, E>(
    State(state): State<EndpointState<C, E>>,
    payload: Result<Json<PaginationParam>, JsonRejection>,
) -> Result<Json<u64>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let pagination = body(payload).map_err(|e| e.with_operation(ApiOperation::Count))?;
    let count = state.service().count_with_pagination(&pagination).await?;
    state.logged(ApiOperation::Count);
    Ok(Json(count))
}

async fn get_with_pagination<C, E>(
    State(state): State<EndpointState<C, E>>,
    Path(nb_items): Path<i64>,
    payload: Result<Json<PaginationParam>, JsonRejection>,
) -> Result<Json<Vec<E::Dto>>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let pagination = body(payload)?;
    let rows = state.service().get_with_pagination(&pagination, nb_items).await?;
    state.logged(ApiOperation::List);
    Ok(Json(rows))
}

async fn update<C, E>(
    State(state): State<EndpointState<C, E>>,
    payload: Result<Json<E::Dto>, JsonRejection>,
) -> Result<Json<E::Dto>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    let dto = body(payload).map_err(|e| e.with_operation(ApiOperation::Update))?;
    let updated = state.service().update(dto).await?;
    state.logged(ApiOperation::Update);
    Ok(Json(updated))
}

async fn remove<C, E>(
    State(state): State<EndpointState<C, E>>,
    Path(id): Path<EntityId>,
) -> Result<Json<bool>, ApiError>
where
    C: DataContext + EntitySource<E>,
    E: Entity,
{
    state.service().remove(id).await?;
    state.logged(ApiOperation::Delete);
    Ok(Json(true))
}
