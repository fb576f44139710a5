//! Local home-automation hub model.
//!
//! The hub exposes a fixed catalogue of service types, each made of typed
//! characteristics. Bindings publish services through [`LocalHub`] and push
//! characteristic values into it; the host calls back into the bridge for
//! reads and writes.

mod memory;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

pub use memory::HubService;
pub use memory::MemoryHub;

/// Service types understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ServiceType {
    Switch,
    Lightbulb,
    Fanv2,
    Thermostat,
    HeaterCooler,
    LockMechanism,
    GarageDoorOpener,
    WindowCovering,
    Valve,
    Speaker,
    TemperatureSensor,
    HumiditySensor,
    LightSensor,
    MotionSensor,
    ContactSensor,
    LeakSensor,
    SmokeSensor,
    CarbonMonoxideSensor,
    OccupancySensor,
    Battery,
}

/// Characteristics understood by the hub.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
pub enum Characteristic {
    On,
    Brightness,
    Hue,
    Saturation,
    ColorTemperature,
    Active,
    InUse,
    RotationSpeed,
    SwingMode,
    CurrentTemperature,
    TargetTemperature,
    TemperatureDisplayUnits,
    CurrentHeatingCoolingState,
    TargetHeatingCoolingState,
    HeatingThresholdTemperature,
    CoolingThresholdTemperature,
    CurrentHeaterCoolerState,
    TargetHeaterCoolerState,
    CurrentRelativeHumidity,
    CurrentAmbientLightLevel,
    MotionDetected,
    ContactSensorState,
    LeakDetected,
    SmokeDetected,
    CarbonMonoxideDetected,
    OccupancyDetected,
    BatteryLevel,
    StatusLowBattery,
    LockCurrentState,
    LockTargetState,
    CurrentDoorState,
    TargetDoorState,
    ObstructionDetected,
    CurrentPosition,
    TargetPosition,
    PositionState,
    Mute,
    Volume,
}

/// A characteristic value as exchanged with the hub.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CharValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl CharValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            CharValue::Bool(b) => Some(b),
            CharValue::Int(i) => Some(i != 0),
            CharValue::Float(_) => None,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            CharValue::Bool(b) => Some(i64::from(b)),
            CharValue::Int(i) => Some(i),
            CharValue::Float(f) => Some(f.round() as i64),
        }
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            CharValue::Bool(_) => None,
            CharValue::Int(i) => Some(i as f64),
            CharValue::Float(f) => Some(f),
        }
    }
}

impl fmt::Display for CharValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharValue::Bool(b) => write!(f, "{}", b),
            CharValue::Int(i) => write!(f, "{}", i),
            CharValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Identifies one exposed service: the accessory it belongs to plus a subtype
/// unique within that accessory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub accessory_id: String,
    pub subtype: String,
}

impl ServiceKey {
    pub fn new(accessory_id: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            accessory_id: accessory_id.into(),
            subtype: subtype.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.accessory_id, self.subtype)
    }
}

/// Failure reported to the hub from a get or set handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HubError {
    #[error("service communication failure")]
    CommunicationFailure,

    #[error("characteristic {0} is not handled by this service")]
    UnsupportedCharacteristic(Characteristic),

    #[error("invalid value {value} for {characteristic}")]
    InvalidValue {
        characteristic: Characteristic,
        value: CharValue,
    },

    #[error("no service {0}")]
    UnknownService(ServiceKey),
}

/// Host-side registry of exposed services.
pub trait LocalHub: Send + Sync {
    /// Publish a service with the characteristics it will carry
    fn add_service(
        &self,
        key: &ServiceKey,
        service_type: ServiceType,
        name: &str,
        characteristics: &[Characteristic],
    );

    /// Push a new value for one characteristic of a published service
    fn update_characteristic(&self, key: &ServiceKey, characteristic: Characteristic, value: CharValue);

    /// Tear a service down permanently
    fn remove_service(&self, key: &ServiceKey);
}

// Enumerated characteristic values.

pub mod heating_cooling {
    pub const OFF: i64 = 0;
    pub const HEAT: i64 = 1;
    pub const COOL: i64 = 2;
    pub const AUTO: i64 = 3;
}

pub mod heater_cooler {
    pub const INACTIVE: i64 = 0;
    pub const IDLE: i64 = 1;
    pub const HEATING: i64 = 2;
    pub const COOLING: i64 = 3;

    pub const TARGET_AUTO: i64 = 0;
    pub const TARGET_HEAT: i64 = 1;
    pub const TARGET_COOL: i64 = 2;
}

pub mod display_units {
    pub const CELSIUS: i64 = 0;
    pub const FAHRENHEIT: i64 = 1;
}

pub mod lock_state {
    pub const UNSECURED: i64 = 0;
    pub const SECURED: i64 = 1;
    pub const JAMMED: i64 = 2;
    pub const UNKNOWN: i64 = 3;
}

pub mod door_state {
    pub const OPEN: i64 = 0;
    pub const CLOSED: i64 = 1;
    pub const OPENING: i64 = 2;
    pub const CLOSING: i64 = 3;
    pub const STOPPED: i64 = 4;
}

pub mod position_state {
    pub const DECREASING: i64 = 0;
    pub const INCREASING: i64 = 1;
    pub const STOPPED: i64 = 2;
}

pub mod contact_state {
    pub const DETECTED: i64 = 0;
    pub const NOT_DETECTED: i64 = 1;
}
