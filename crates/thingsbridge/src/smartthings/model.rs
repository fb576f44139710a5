//! Wire types for the SmartThings REST API.
//!
//! Status payloads are arbitrarily nested JSON on the wire. They are modelled
//! as capability -> attribute -> [`AttributeState`] maps, and every read goes
//! through [`ComponentStatus`] accessors that distinguish an absent attribute
//! from one whose value has the wrong shape.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A device as returned by `GET devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub manufacturer_name: Option<String>,

    #[serde(default)]
    pub location_id: Option<String>,

    #[serde(default)]
    pub components: Vec<Component>,
}

impl Device {
    /// Human-readable name: the user label if set, else the device name.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.device_id)
    }
}

/// One component of a device ("main", "switch1", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: String,

    #[serde(default)]
    pub capabilities: Vec<CapabilityReference>,
}

impl Component {
    /// Capability ids in the order the device advertises them.
    pub fn capability_ids(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityReference {
    pub id: String,

    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: String,
    pub name: String,
}

/// Paged list envelope used by `GET devices` and `GET locations`.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,

    #[serde(default, rename = "_links")]
    pub links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageLinks {
    #[serde(default)]
    pub next: Option<Link>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Link {
    pub href: String,
}

/// Response of `GET devices/{id}/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub state: String,
}

impl DeviceHealth {
    pub fn is_online(&self) -> bool {
        self.state == "ONLINE"
    }
}

/// Response of `GET devices/{id}/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default)]
    pub components: HashMap<String, ComponentStatus>,
}

/// Reported state of a single attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeState {
    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Failure to read an attribute out of a status snapshot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatusError {
    #[error("{capability}.{attribute} is missing from the device status")]
    Missing {
        capability: String,
        attribute: String,
    },

    #[error("{capability}.{attribute} is malformed: expected {expected}, got {found}")]
    Malformed {
        capability: String,
        attribute: String,
        expected: &'static str,
        found: String,
    },
}

/// Status of one component, keyed by capability id then attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentStatus(HashMap<String, HashMap<String, AttributeState>>);

impl ComponentStatus {
    /// Raw attribute value. Null values count as missing.
    pub fn value(&self, capability: &str, attribute: &str) -> Result<&Value, StatusError> {
        self.0
            .get(capability)
            .and_then(|attrs| attrs.get(attribute))
            .and_then(|state| state.value.as_ref())
            .filter(|v| !v.is_null())
            .ok_or_else(|| StatusError::Missing {
                capability: capability.to_string(),
                attribute: attribute.to_string(),
            })
    }

    pub fn number(&self, capability: &str, attribute: &str) -> Result<f64, StatusError> {
        let value = self.value(capability, attribute)?;
        value
            .as_f64()
            .ok_or_else(|| malformed(capability, attribute, "a number", value))
    }

    pub fn text(&self, capability: &str, attribute: &str) -> Result<&str, StatusError> {
        let value = self.value(capability, attribute)?;
        value
            .as_str()
            .ok_or_else(|| malformed(capability, attribute, "a string", value))
    }

    /// Unit reported alongside an attribute, if any.
    pub fn unit(&self, capability: &str, attribute: &str) -> Option<&str> {
        self.0
            .get(capability)
            .and_then(|attrs| attrs.get(attribute))
            .and_then(|state| state.unit.as_deref())
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.0.contains_key(capability)
    }

    /// Set one attribute, replacing whatever was there.
    pub fn insert(&mut self, capability: &str, attribute: &str, state: AttributeState) {
        self.0
            .entry(capability.to_string())
            .or_default()
            .insert(attribute.to_string(), state);
    }
}

pub(crate) fn malformed(
    capability: &str,
    attribute: &str,
    expected: &'static str,
    found: &Value,
) -> StatusError {
    StatusError::Malformed {
        capability: capability.to_string(),
        attribute: attribute.to_string(),
        expected,
        found: found.to_string(),
    }
}

/// A pushed state change delivered by the event subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_id: String,
    pub component_id: String,
    pub capability: String,
    pub attribute: String,
    pub value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A remote operation request, serialized verbatim into the command body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub capability: String,
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
}

impl Command {
    pub fn new(capability: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            component: None,
            capability: capability.into(),
            command: command.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn on_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

/// Body of `POST devices/{id}/commands`.
#[derive(Debug, Serialize)]
pub(crate) struct CommandBatch<'a> {
    pub commands: &'a [Command],
}
