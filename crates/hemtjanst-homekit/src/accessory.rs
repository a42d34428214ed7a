//! Accessory model presented to the bridge
//!
//! An accessory holds services, a service holds characteristics. Values
//! change in place (device reports, controller writes) while the structure
//! stays fixed once the accessory is installed.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::capability::{fixed, ACCESSORY_INFORMATION, BRIDGING_STATE};
use crate::identity::type_to_id;

/// Value format of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Bool,
    UInt8,
    UInt16,
    UInt32,
    Int32,
    Float,
    String,
}

impl Format {
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool | Self::String)
    }

    /// Integers this format can carry
    fn int_range(self) -> RangeInclusive<i64> {
        match self {
            Self::UInt8 => 0..=i64::from(u8::MAX),
            Self::UInt16 => 0..=i64::from(u16::MAX),
            Self::UInt32 => 0..=i64::from(u32::MAX),
            Self::Int32 => i64::from(i32::MIN)..=i64::from(i32::MAX),
            _ => i64::MIN..=i64::MAX,
        }
    }

    fn default_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Float => Value::Float(0.0),
            Self::String => Value::String(String::new()),
            _ => Value::Int(0),
        }
    }
}

/// Characteristic value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Parse a payload received on a feature's get topic
    pub fn parse(format: Format, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match format {
            Format::Bool => match raw.to_lowercase().as_str() {
                "1" | "true" | "on" => Some(Self::Bool(true)),
                "0" | "false" | "off" => Some(Self::Bool(false)),
                _ => None,
            },
            Format::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Self::Float),
            Format::String => Some(Self::String(raw.to_string())),
            _ => {
                let value = raw.parse::<i64>().ok().or_else(|| {
                    let rounded = raw.parse::<f64>().ok()?.round();
                    // i64::MAX as f64 rounds up to 2^63, which does not fit
                    (rounded >= i64::MIN as f64 && rounded < i64::MAX as f64)
                        .then_some(rounded as i64)
                })?;
                format.int_range().contains(&value).then_some(Self::Int(value))
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String form published on a feature's set topic; booleans are `1`/`0`
    pub fn to_wire(&self) -> String {
        match self {
            Self::Bool(true) => "1".to_string(),
            Self::Bool(false) => "0".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

type RemoteWriteFn = Box<dyn Fn(&Value) + Send + Sync>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A single value of a service
pub struct Characteristic {
    pub id: u64,
    pub type_code: String,
    pub format: Format,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub writable: bool,
    value: RwLock<Value>,
    on_remote_write: RwLock<Option<RemoteWriteFn>>,
}

impl Characteristic {
    pub fn new(type_code: &str, format: Format) -> Self {
        Self {
            id: 0,
            type_code: type_code.to_string(),
            format,
            min: None,
            max: None,
            step: None,
            writable: false,
            value: RwLock::new(format.default_value()),
            on_remote_write: RwLock::new(None),
        }
    }

    pub fn with_value(self, value: Value) -> Self {
        *write(&self.value) = value;
        self
    }

    pub fn value(&self) -> Value {
        read(&self.value).clone()
    }

    /// Store a value reported by the device
    pub fn update_value(&self, value: Value) {
        *write(&self.value) = value;
    }

    /// Parse and store a raw device report
    ///
    /// Returns false, leaving the value unchanged, if the report does not fit
    /// the format or lies outside `min`..=`max`.
    pub fn update_from_wire(&self, raw: &str) -> bool {
        match Value::parse(self.format, raw) {
            Some(value) if self.in_bounds(&value) => {
                self.update_value(value);
                true
            }
            _ => false,
        }
    }

    fn in_bounds(&self, value: &Value) -> bool {
        let Some(v) = value.as_f64() else {
            return true;
        };
        self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max)
    }

    /// Callback for values written by the controller
    pub fn on_remote_write(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        *write(&self.on_remote_write) = Some(Box::new(callback));
    }

    /// Apply a controller write; false if the characteristic is read-only
    pub fn write_from_remote(&self, value: Value) -> bool {
        if !self.writable {
            return false;
        }
        self.update_value(value.clone());
        if let Some(callback) = read(&self.on_remote_write).as_ref() {
            callback(&value);
        }
        true
    }

    fn same_structure(&self, other: &Self) -> bool {
        self.id == other.id
            && self.type_code == other.type_code
            && self.format == other.format
            && self.min == other.min
            && self.max == other.max
            && self.step == other.step
            && self.writable == other.writable
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("id", &self.id)
            .field("type_code", &self.type_code)
            .field("format", &self.format)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("step", &self.step)
            .field("writable", &self.writable)
            .field("value", &self.value())
            .finish()
    }
}

/// A group of characteristics
#[derive(Debug)]
pub struct Service {
    pub id: u64,
    pub type_code: String,
    pub characteristics: Vec<Arc<Characteristic>>,
}

impl Service {
    pub fn new(type_code: &str) -> Self {
        Self {
            id: 0,
            type_code: type_code.to_string(),
            characteristics: Vec::new(),
        }
    }

    pub fn add_characteristic(&mut self, characteristic: Characteristic) -> Arc<Characteristic> {
        let characteristic = Arc::new(characteristic);
        self.characteristics.push(characteristic.clone());
        characteristic
    }

    fn same_structure(&self, other: &Self) -> bool {
        self.id == other.id
            && self.type_code == other.type_code
            && self.characteristics.len() == other.characteristics.len()
            && self
                .characteristics
                .iter()
                .zip(&other.characteristics)
                .all(|(a, b)| a.same_structure(b))
    }
}

/// Identity shown for an accessory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

/// External representation of one device
#[derive(Debug)]
pub struct Accessory {
    pub id: u64,
    pub category: u8,
    pub info: AccessoryInfo,
    pub services: Vec<Service>,
}

impl Accessory {
    /// New accessory with its information and bridging-state services,
    /// initially unreachable
    pub fn new(id: u64, info: AccessoryInfo, category: u8) -> Self {
        let mut information = Service::new(ACCESSORY_INFORMATION.type_code);
        for (type_code, text) in [
            (fixed::NAME, &info.name),
            (fixed::MANUFACTURER, &info.manufacturer),
            (fixed::MODEL, &info.model),
            (fixed::SERIAL_NUMBER, &info.serial_number),
        ] {
            information.add_characteristic(
                Characteristic::new(type_code, Format::String).with_value(Value::String(text.clone())),
            );
        }
        let mut identify = Characteristic::new(fixed::IDENTIFY, Format::Bool);
        identify.writable = true;
        information.add_characteristic(identify);

        let mut bridging = Service::new(BRIDGING_STATE.type_code);
        bridging.add_characteristic(Characteristic::new(fixed::REACHABLE, Format::Bool));

        let mut accessory = Self {
            id,
            category,
            info,
            services: vec![information, bridging],
        };
        accessory.assign_ids();
        accessory
    }

    pub fn add_service(&mut self, service: Service) {
        self.services.push(service);
        self.assign_ids();
    }

    /// Derive service and characteristic ids from their type codes
    ///
    /// Codes that do not decode fall back to a running low-range counter.
    pub fn assign_ids(&mut self) {
        let mut next = 1u64;
        let mut fallback = || {
            let id = next;
            next += 1;
            id
        };
        for service in &mut self.services {
            service.id = type_to_id(&service.type_code).unwrap_or_else(&mut fallback);
            for characteristic in &mut service.characteristics {
                let id = type_to_id(&characteristic.type_code).unwrap_or_else(&mut fallback);
                match Arc::get_mut(characteristic) {
                    Some(c) => c.id = id,
                    None => tracing::warn!(
                        type_code = %characteristic.type_code,
                        "Characteristic shared before ids were assigned"
                    ),
                }
            }
        }
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Arc<Characteristic>> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }

    /// First characteristic of a type, across all services
    pub fn find_characteristic(&self, type_code: &str) -> Option<&Arc<Characteristic>> {
        self.characteristics().find(|c| c.type_code == type_code)
    }

    pub fn characteristic(&self, id: u64) -> Option<&Arc<Characteristic>> {
        self.characteristics().find(|c| c.id == id)
    }

    pub fn set_reachability(&self, reachable: bool) {
        if let Some(c) = self.find_characteristic(fixed::REACHABLE) {
            c.update_value(Value::Bool(reachable));
        }
    }

    pub fn reachability(&self) -> bool {
        self.find_characteristic(fixed::REACHABLE)
            .map(|c| c.value() == Value::Bool(true))
            .unwrap_or(false)
    }

    /// Equal ids, category, info and service layout; values are ignored
    pub fn structurally_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.category == other.category
            && self.info == other.info
            && self.services.len() == other.services.len()
            && self
                .services
                .iter()
                .zip(&other.services)
                .all(|(a, b)| a.same_structure(b))
    }
}
