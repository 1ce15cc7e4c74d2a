//! Entities shared by the unit tests

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{
    BaseDto, BaseEntity, Dto, Entity, EntityId, FieldDef, FieldKind, Record, TypeDescriptor,
    TypeRegistry, Value,
};

pub const STATUSES: &[&str] = &["Active", "Inactive", "Retired"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Active,
    Inactive,
    Retired,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
            Self::Retired => "Retired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Sensor,
    Actuator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
}

impl Record for Location {
    fn type_name(&self) -> &'static str {
        "Location"
    }

    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "city" => Some(Value::Text(&self.city)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
}

impl Record for Reading {
    fn type_name(&self) -> &'static str {
        "Reading"
    }

    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "value" => Some(Value::Float(self.value)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(flatten)]
    pub base: BaseEntity,
    pub kind: DeviceKind,
    pub name: String,
    pub status: Status,
    pub temperature: Option<f64>,
    /// Only meaningful for sensors
    pub threshold: Option<f64>,
    #[serde(default)]
    pub settings: serde_json::Value,
    pub location: Option<Location>,
    #[serde(default)]
    pub readings: Vec<Reading>,
}

impl Record for Device {
    fn type_name(&self) -> &'static str {
        match self.kind {
            DeviceKind::Sensor => "Sensor",
            DeviceKind::Actuator => "Actuator",
        }
    }

    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "name" => Some(Value::Text(&self.name)),
            "status" => Some(Value::Enum(self.status.as_str())),
            "temperature" => Some(self.temperature.map_or(Value::Null, Value::Float)),
            "threshold" => Some(self.threshold.map_or(Value::Null, Value::Float)),
            "settings" => Some(Value::Json(&self.settings)),
            "location" => Some(
                self.location
                    .as_ref()
                    .map_or(Value::Null, |l| Value::Record(l as &dyn Record)),
            ),
            "readings" => None,
            _ => self.base.field(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDto {
    #[serde(flatten)]
    pub base: BaseDto,
    pub kind: DeviceKind,
    pub name: String,
    pub status: Status,
    pub temperature: Option<f64>,
    pub city: Option<String>,
}

impl Dto<Device> for DeviceDto {
    fn from_model(model: &Device) -> Self {
        Self {
            base: BaseDto::from(&model.base),
            kind: model.kind,
            name: model.name.clone(),
            status: model.status,
            temperature: model.temperature,
            city: model.location.as_ref().map(|l| l.city.clone()),
        }
    }

    fn into_model(self) -> Device {
        Device {
            base: BaseEntity::from(self.base),
            kind: self.kind,
            name: self.name,
            status: self.status,
            temperature: self.temperature,
            threshold: None,
            settings: serde_json::Value::Null,
            location: self.city.map(|city| Location { city }),
            readings: Vec::new(),
        }
    }
}

impl Entity for Device {
    const TYPE_NAME: &'static str = "Device";
    type Dto = DeviceDto;

    fn id(&self) -> EntityId {
        self.base.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.base.id = id;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.base.ts
    }

    fn version(&self) -> uuid::Uuid {
        self.base.version
    }

    fn set_version(&mut self, version: uuid::Uuid) {
        self.base.version = version;
    }

    fn descriptors() -> Vec<TypeDescriptor> {
        vec![
            TypeDescriptor::new("Device")
                .fields(BaseEntity::fields())
                .field(FieldDef::new("name", FieldKind::Text))
                .field(FieldDef::new("status", FieldKind::Enum(STATUSES)))
                .field(FieldDef::new("temperature", FieldKind::Float).nullable())
                .field(FieldDef::new("settings", FieldKind::Json))
                .field(FieldDef::new("location", FieldKind::Reference("Location")).nullable())
                .field(FieldDef::new("readings", FieldKind::Collection("Reading"))),
            TypeDescriptor::new("Sensor")
                .extends("Device")
                .field(FieldDef::new("threshold", FieldKind::Float).nullable()),
            TypeDescriptor::new("Actuator").extends("Device"),
            TypeDescriptor::new("Location").field(FieldDef::new("city", FieldKind::Text)),
            TypeDescriptor::new("Reading").field(FieldDef::new("value", FieldKind::Float)),
        ]
    }
}

/// A transient device; sensors get their temperature as threshold
pub fn device(
    name: &str,
    kind: DeviceKind,
    status: Status,
    temperature: Option<f64>,
    city: Option<&str>,
) -> Device {
    Device {
        base: BaseEntity::new(),
        kind,
        name: name.to_string(),
        status,
        temperature,
        threshold: match kind {
            DeviceKind::Sensor => temperature,
            DeviceKind::Actuator => None,
        },
        settings: serde_json::json!({ "firmware": "1.0" }),
        location: city.map(|city| Location {
            city: city.to_string(),
        }),
        readings: Vec::new(),
    }
}

pub fn registry() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::builder()
            .entity::<Device>()
            .build()
            .expect("fixture registry is valid"),
    )
}
