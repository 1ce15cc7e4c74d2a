//! Base entity and DTO contracts
//!
//! An [`Entity`] is a persisted record with an integer identity, a timestamp
//! and a version token. The version token is owned by the data context: it is
//! regenerated on every insert and update and compared on every tracked
//! update or delete to detect concurrent writers.
//!
//! Entities also implement [`Record`] so the query pipeline can read their
//! fields by name, and declare [`TypeDescriptor`]s so filters can be checked
//! against the model before any row is read.

mod record;
mod registry;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub use record::{compare_values, resolve_path, Record, Value};
pub use registry::{
    FieldDef, FieldKind, ResolvedPath, TypeDescriptor, TypeRegistry, TypeRegistryBuilder,
};

/// Primary key type shared by every entity
pub type EntityId = i64;

/// Serialized key of the primary key
pub const ID_KEY: &str = "id";
/// Serialized key of the entity timestamp
pub const TIMESTAMP_KEY: &str = "ts";
/// Serialized key of the optimistic-concurrency token
pub const VERSION_KEY: &str = "version";

/// A persisted record managed by repositories and the unit of work
///
/// Implementations serialize with `id`, `ts` and `version` keys (usually by
/// flattening a [`BaseEntity`]); the change tracker and the conflict merge
/// work on that serialized form.
pub trait Entity: Record + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Root type name; also names the table and the HTTP route
    const TYPE_NAME: &'static str;

    /// Wire-facing representation
    type Dto: Dto<Self>;

    fn id(&self) -> EntityId;

    fn set_id(&mut self, id: EntityId);

    fn timestamp(&self) -> DateTime<Utc>;

    fn version(&self) -> Uuid;

    fn set_version(&mut self, version: Uuid);

    /// Descriptors for the root type and every runtime subtype
    fn descriptors() -> Vec<TypeDescriptor>;

    fn to_dto(&self) -> Self::Dto {
        Self::Dto::from_model(self)
    }
}

/// Flattened representation of an entity exchanged with callers
pub trait Dto<E>: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn from_model(model: &E) -> Self;

    fn into_model(self) -> E;
}

/// Identity, timestamp and version shared by concrete entities
///
/// Embed with `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEntity {
    #[serde(default)]
    pub id: EntityId,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub version: Uuid,
}

impl BaseEntity {
    /// A transient entity stamped now; the data context assigns id and version
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(ts: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            ts,
            version: Uuid::nil(),
        }
    }

    /// Field definitions for the three base columns
    pub fn fields() -> [FieldDef; 3] {
        [
            FieldDef::new(ID_KEY, FieldKind::Integer),
            FieldDef::new(TIMESTAMP_KEY, FieldKind::Timestamp),
            FieldDef::new(VERSION_KEY, FieldKind::Uuid),
        ]
    }

    /// [`Record::field`] for the base columns
    pub fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            ID_KEY => Some(Value::Int(self.id)),
            TIMESTAMP_KEY => Some(Value::Timestamp(self.ts)),
            VERSION_KEY => Some(Value::Uuid(self.version)),
            _ => None,
        }
    }
}

impl Default for BaseEntity {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity and timestamp carried by DTOs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseDto {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}

impl From<&BaseEntity> for BaseDto {
    fn from(base: &BaseEntity) -> Self {
        Self {
            id: base.id,
            ts: Some(base.ts),
        }
    }
}

impl From<BaseDto> for BaseEntity {
    fn from(dto: BaseDto) -> Self {
        Self {
            id: dto.id,
            ts: dto.ts.unwrap_or_else(Utc::now),
            version: Uuid::nil(),
        }
    }
}
