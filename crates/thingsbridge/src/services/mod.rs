//! Service bindings: one exposed hub service backed by a set of capabilities.
//!
//! Every leaf binding is built from a [`ServiceContext`] (owner link, claimed
//! capabilities, hub handle) and implements [`Service`]. The resolver's
//! [`ServiceKind`] tag selects which leaf gets built.

mod air_conditioner;
mod door;
mod fan;
mod light;
mod lock;
mod sensors;
mod speaker;
mod switch;
mod thermostat;
pub mod transition;
pub mod units;
mod valve;
mod window_covering;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use strum::Display;
use tracing::debug;
use tracing::warn;

use crate::accessory::DeviceLink;
use crate::accessory::PollingScheduler;
use crate::config::BridgeOptions;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::LocalHub;
use crate::hub::ServiceKey;
use crate::hub::ServiceType;
use crate::smartthings::Command;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;
use crate::smartthings::model::AttributeState;

/// Tag produced by the resolver naming the leaf binding to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "camelCase")]
pub enum ServiceKind {
    Switch,
    Light,
    Fan,
    Thermostat,
    AirConditioner,
    Lock,
    GarageDoor,
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

/// A hub service published by a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub key: ServiceKey,
    pub service_type: ServiceType,
    pub name: String,
    pub characteristics: Vec<Characteristic>,
}

/// A characteristic the poller keeps up to date, optionally with the
/// target characteristic paired with it.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSpec {
    pub key: ServiceKey,
    pub characteristic: Characteristic,
    pub target: Option<Characteristic>,
    pub group: PollGroup,
}

#[async_trait]
pub trait Service: Send + Sync {
    fn kind(&self) -> ServiceKind;

    fn context(&self) -> &ServiceContext;

    /// Hub services published for this binding.
    fn exposures(&self) -> Vec<Exposure>;

    /// Characteristics refreshed by the poller when push events are off.
    fn polls(&self) -> Vec<PollSpec> {
        Vec::new()
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError>;

    async fn set(&self, characteristic: Characteristic, _value: CharValue) -> Result<(), HubError> {
        Err(HubError::UnsupportedCharacteristic(characteristic))
    }

    /// Project a pushed event onto the hub. Never talks to the cloud.
    fn process_event(&self, event: &DeviceEvent);

    fn is_retired(&self) -> bool {
        self.context().is_retired()
    }
}

/// Build the leaf binding for a resolved kind.
pub fn build(kind: ServiceKind, ctx: ServiceContext) -> Arc<dyn Service> {
    match kind {
        ServiceKind::Switch => Arc::new(switch::SwitchService::new(ctx)),
        ServiceKind::Light => Arc::new(light::LightService::new(ctx)),
        ServiceKind::Fan => Arc::new(fan::FanService::new(ctx)),
        ServiceKind::Thermostat => Arc::new(thermostat::ThermostatService::new(ctx)),
        ServiceKind::AirConditioner => {
            Arc::new(air_conditioner::AirConditionerService::new(ctx))
        }
        ServiceKind::Lock => Arc::new(lock::LockService::new(ctx)),
        ServiceKind::GarageDoor => Arc::new(door::GarageDoorService::new(ctx)),
        ServiceKind::WindowCovering => {
            Arc::new(window_covering::WindowCoveringService::new(ctx))
        }
        ServiceKind::Valve => Arc::new(valve::ValveService::new(ctx)),
        ServiceKind::Speaker => Arc::new(speaker::SpeakerService::new(ctx)),
        ServiceKind::TemperatureSensor => sensor(&sensors::TEMPERATURE, ctx),
        ServiceKind::HumiditySensor => sensor(&sensors::HUMIDITY, ctx),
        ServiceKind::LightSensor => sensor(&sensors::LIGHT, ctx),
        ServiceKind::MotionSensor => sensor(&sensors::MOTION, ctx),
        ServiceKind::ContactSensor => sensor(&sensors::CONTACT, ctx),
        ServiceKind::LeakSensor => sensor(&sensors::LEAK, ctx),
        ServiceKind::SmokeSensor => sensor(&sensors::SMOKE, ctx),
        ServiceKind::CarbonMonoxideSensor => sensor(&sensors::CARBON_MONOXIDE, ctx),
        ServiceKind::OccupancySensor => sensor(&sensors::OCCUPANCY, ctx),
        ServiceKind::Battery => sensor(&sensors::BATTERY, ctx),
    }
}

fn sensor(spec: &'static sensors::SensorSpec, ctx: ServiceContext) -> Arc<dyn Service> {
    Arc::new(sensors::SensorService::new(spec, ctx))
}

/// What a binding knows about its place in the accessory.
#[derive(Clone)]
pub struct ServiceContext {
    link: Arc<DeviceLink>,
    hub: Arc<dyn LocalHub>,
    poller: Arc<PollingScheduler>,
    options: Arc<BridgeOptions>,
    component_id: String,
    capabilities: Vec<String>,
    key: ServiceKey,
    name: String,
    retired: Arc<AtomicBool>,
}

impl ServiceContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: Arc<DeviceLink>,
        hub: Arc<dyn LocalHub>,
        poller: Arc<PollingScheduler>,
        options: Arc<BridgeOptions>,
        component_id: String,
        capabilities: Vec<String>,
        key: ServiceKey,
        name: String,
    ) -> Self {
        Self {
            link,
            hub,
            poller,
            options,
            component_id,
            capabilities,
            key,
            name,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Capabilities claimed by this binding.
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn claims(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Key of an additional hub service published by the same binding.
    pub fn sub_key(&self, suffix: &str) -> ServiceKey {
        ServiceKey::new(
            self.key.accessory_id.clone(),
            format!("{}.{}", self.key.subtype, suffix),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary exposure of this binding.
    pub fn exposure(&self, service_type: ServiceType, characteristics: Vec<Characteristic>) -> Exposure {
        Exposure {
            key: self.key.clone(),
            service_type,
            name: self.name.clone(),
            characteristics,
        }
    }

    pub fn poll(&self, characteristic: Characteristic, group: PollGroup) -> PollSpec {
        PollSpec {
            key: self.key.clone(),
            characteristic,
            target: None,
            group,
        }
    }

    pub fn poll_with_target(
        &self,
        characteristic: Characteristic,
        target: Characteristic,
        group: PollGroup,
    ) -> PollSpec {
        PollSpec {
            target: Some(target),
            ..self.poll(characteristic, group)
        }
    }

    /// Refresh the owner's status. Fails fast while the accessory is offline.
    pub async fn get_status(&self) -> bool {
        if !self.link.is_online() {
            debug!("[{}] Offline, not refreshing", self.name);
            return false;
        }
        self.link.refresh_status().await
    }

    /// Fresh snapshot of this binding's component, or a communication failure.
    pub async fn status(&self) -> Result<Arc<ComponentStatus>, HubError> {
        if self.get_status().await {
            Ok(self.link.component_status(&self.component_id))
        } else {
            Err(HubError::CommunicationFailure)
        }
    }

    /// Cached snapshot overlaid with the attribute an event carries.
    ///
    /// The cache itself is left alone. An event without a unit inherits the
    /// unit last reported for that attribute.
    pub fn event_status(&self, event: &DeviceEvent) -> ComponentStatus {
        let mut status = (*self.link.component_status(&self.component_id)).clone();
        let unit = event.unit.clone().or_else(|| {
            status
                .unit(&event.capability, &event.attribute)
                .map(str::to_string)
        });
        status.insert(
            &event.capability,
            &event.attribute,
            AttributeState {
                value: Some(event.value.clone()),
                unit,
                timestamp: None,
            },
        );
        status
    }

    /// Surface a status read error as the hub's communication failure.
    pub fn translate<T>(&self, result: Result<T, StatusError>) -> Result<T, HubError> {
        result.map_err(|e| {
            warn!("[{}] {}", self.name, e);
            HubError::CommunicationFailure
        })
    }

    pub async fn send_command(
        &self,
        capability: &str,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<(), HubError> {
        let mut command = Command::new(capability, command);
        if !arguments.is_empty() {
            command = command.with_arguments(arguments);
        }
        self.send_commands(vec![command]).await
    }

    /// Send commands addressed to this binding's component.
    pub async fn send_commands(&self, commands: Vec<Command>) -> Result<(), HubError> {
        if !self.link.is_online() {
            debug!("[{}] Offline, not sending commands", self.name);
            return Err(HubError::CommunicationFailure);
        }
        let commands: Vec<Command> = commands
            .into_iter()
            .map(|c| c.on_component(self.component_id.clone()))
            .collect();
        if self.link.send_commands(&commands).await {
            Ok(())
        } else {
            Err(HubError::CommunicationFailure)
        }
    }

    pub fn update(&self, characteristic: Characteristic, value: CharValue) {
        self.hub.update_characteristic(&self.key, characteristic, value);
    }

    pub fn update_on(&self, key: &ServiceKey, characteristic: Characteristic, value: CharValue) {
        self.hub.update_characteristic(key, characteristic, value);
    }

    /// Push a translated value, dropping it if the translation failed.
    pub fn project(&self, characteristic: Characteristic, value: Result<CharValue, StatusError>) {
        self.project_on(&self.key, characteristic, value);
    }

    pub fn project_on(
        &self,
        key: &ServiceKey,
        characteristic: Characteristic,
        value: Result<CharValue, StatusError>,
    ) {
        match value {
            Ok(value) => self.update_on(key, characteristic, value),
            Err(e) => debug!("[{}] Ignoring event for {}: {}", self.name, characteristic, e),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Give up on this binding for good: stop its polling and remove its
    /// hub service.
    pub fn retire(&self, reason: &StatusError) {
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("[{}] Removing service after bad status: {}", self.name, reason);
        self.poller.cancel_service(&self.key);
        self.hub.remove_service(&self.key);
    }
}

// Shared readers for the common on/off style attributes.

/// `true`/`false` for one of two expected string values, malformed otherwise.
pub(crate) fn flag(
    status: &ComponentStatus,
    capability: &str,
    attribute: &str,
    on: &str,
    off: &str,
) -> Result<bool, StatusError> {
    let value = status.text(capability, attribute)?;
    if value == on {
        Ok(true)
    } else if value == off {
        Ok(false)
    } else {
        Err(crate::smartthings::model::malformed(
            capability,
            attribute,
            "a known state",
            &Value::String(value.to_string()),
        ))
    }
}

pub(crate) fn switch_on(status: &ComponentStatus) -> Result<bool, StatusError> {
    flag(status, "switch", "switch", "on", "off")
}

/// Integer argument from a hub value, or the invalid-value error for it.
pub(crate) fn int_arg(characteristic: Characteristic, value: CharValue) -> Result<i64, HubError> {
    value.as_i64().ok_or(HubError::InvalidValue {
        characteristic,
        value,
    })
}

pub(crate) fn float_arg(characteristic: Characteristic, value: CharValue) -> Result<f64, HubError> {
    value.as_f64().ok_or(HubError::InvalidValue {
        characteristic,
        value,
    })
}

pub(crate) fn bool_arg(characteristic: Characteristic, value: CharValue) -> Result<bool, HubError> {
    value.as_bool().ok_or(HubError::InvalidValue {
        characteristic,
        value,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::hub::MemoryHub;
    use crate::smartthings::MockApi;

    /// A binding context wired to a mock cloud and an in-memory hub.
    pub struct Harness {
        pub api: Arc<MockApi>,
        pub hub: Arc<MemoryHub>,
        pub poller: Arc<PollingScheduler>,
        pub link: Arc<DeviceLink>,
    }

    impl Harness {
        pub fn new(status: serde_json::Value) -> Self {
            let api = Arc::new(MockApi::with_status(status));
            let link = Arc::new(DeviceLink::new(
                "dev-1".to_string(),
                "Test Device".to_string(),
                api.clone(),
            ));
            Self {
                api,
                hub: Arc::new(MemoryHub::new()),
                poller: Arc::new(PollingScheduler::new(false)),
                link,
            }
        }

        pub fn context(&self, capabilities: &[&str], options: BridgeOptions) -> ServiceContext {
            ServiceContext::new(
                self.link.clone(),
                self.hub.clone(),
                self.poller.clone(),
                Arc::new(options),
                "main".to_string(),
                capabilities.iter().map(|c| c.to_string()).collect(),
                ServiceKey::new("dev-1", "main.test"),
                "Test Device".to_string(),
            )
        }

        /// Build a binding and publish its exposures like an accessory would.
        pub fn build(&self, kind: ServiceKind, capabilities: &[&str]) -> Arc<dyn Service> {
            self.build_with(kind, capabilities, BridgeOptions::default())
        }

        pub fn build_with(
            &self,
            kind: ServiceKind,
            capabilities: &[&str],
            options: BridgeOptions,
        ) -> Arc<dyn Service> {
            let service = build(kind, self.context(capabilities, options));
            for exposure in service.exposures() {
                self.hub.add_service(
                    &exposure.key,
                    exposure.service_type,
                    &exposure.name,
                    &exposure.characteristics,
                );
            }
            service
        }

        pub fn key(&self) -> ServiceKey {
            ServiceKey::new("dev-1", "main.test")
        }

        pub fn value(&self, characteristic: Characteristic) -> Option<CharValue> {
            self.hub.value(&self.key(), characteristic)
        }
    }

    pub fn event(capability: &str, attribute: &str, value: serde_json::Value) -> DeviceEvent {
        DeviceEvent {
            device_id: "dev-1".to_string(),
            component_id: "main".to_string(),
            capability: capability.to_string(),
            attribute: attribute.to_string(),
            value,
            unit: None,
        }
    }

    /// The command as it reaches the cloud for the `main` component.
    pub fn sent(capability: &str, command: &str, arguments: Vec<serde_json::Value>) -> Command {
        let command = Command::new(capability, command).on_component("main");
        if arguments.is_empty() {
            command
        } else {
            command.with_arguments(arguments)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::Harness;
    use super::testing::event;
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ServiceKind::AirConditioner.to_string(), "airConditioner");
        assert_eq!(ServiceKind::Battery.to_string(), "battery");
    }

    #[tokio::test]
    async fn test_offline_context_fails_fast() {
        let harness = Harness::new(json!({ "components": {} }));
        harness.api.fail_status.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            harness.link.refresh_status().await;
        }
        let calls = harness.api.status_calls();
        let ctx = harness.context(&["switch"], BridgeOptions::default());

        assert!(!ctx.get_status().await);
        assert_eq!(ctx.send_command("switch", "on", vec![]).await, Err(HubError::CommunicationFailure));
        assert_eq!(harness.api.status_calls(), calls);
        assert!(harness.api.sent().is_empty());
    }

    #[tokio::test]
    async fn test_event_status_inherits_cached_unit() {
        let harness = Harness::new(json!({
            "components": { "main": { "temperatureMeasurement": {
                "temperature": { "value": 70, "unit": "F" }
            } } }
        }));
        assert!(harness.link.refresh_status().await);
        let ctx = harness.context(&["temperatureMeasurement"], BridgeOptions::default());

        let status = ctx.event_status(&event("temperatureMeasurement", "temperature", json!(72)));
        assert_eq!(status.number("temperatureMeasurement", "temperature").unwrap(), 72.0);
        assert_eq!(status.unit("temperatureMeasurement", "temperature"), Some("F"));
        // The cache keeps the fetched value.
        assert_eq!(
            harness
                .link
                .component_status("main")
                .number("temperatureMeasurement", "temperature")
                .unwrap(),
            70.0
        );
    }

    #[test]
    fn test_flag_rejects_unknown_states() {
        let mut status = ComponentStatus::default();
        status.insert(
            "switch",
            "switch",
            AttributeState {
                value: Some(json!("dimmed")),
                ..Default::default()
            },
        );
        assert!(matches!(switch_on(&status), Err(StatusError::Malformed { .. })));
    }
}
