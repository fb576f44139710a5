//! One remote device exposed as a set of hub services.

mod link;
mod polling;
mod resolver;
mod status;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::trace;

pub use link::DeviceLink;
pub use link::OFFLINE_AFTER_FAILURES;
pub use polling::COMMAND_QUIET_PERIOD;
pub use polling::HEALTH_CHECK_INTERVAL;
pub use polling::MAX_JITTER;
pub use polling::OFFLINE_REPROBE_INTERVAL;
pub use polling::PollingScheduler;
pub use resolver::CapabilityResolver;
pub use resolver::ComboSpec;
pub use resolver::Resolution;
pub use resolver::SingleSpec;
pub use status::FRESHNESS_WINDOW;
pub use status::StatusCache;

use crate::config::BridgeOptions;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::LocalHub;
use crate::hub::ServiceKey;
use crate::services;
use crate::services::Service;
use crate::services::ServiceContext;
use crate::smartthings::Command;
use crate::smartthings::Device;
use crate::smartthings::DeviceEvent;
use crate::smartthings::SmartThingsApi;

/// Owns one device's remote session and every binding resolved for it.
///
/// Bindings are created once, component by component, and live as long as
/// the accessory. Commands and status refreshes for all of them go through
/// the one [`DeviceLink`].
pub struct MultiServiceAccessory {
    id: String,
    name: String,
    link: Arc<DeviceLink>,
    hub: Arc<dyn LocalHub>,
    poller: Arc<PollingScheduler>,
    options: Arc<BridgeOptions>,
    resolver: &'static CapabilityResolver,
    bindings: Vec<Arc<dyn Service>>,
    /// Hub service -> owning binding and the characteristics it published.
    routes: HashMap<ServiceKey, (usize, Vec<Characteristic>)>,
}

impl MultiServiceAccessory {
    pub fn new(
        id: String,
        name: String,
        api: Arc<dyn SmartThingsApi>,
        hub: Arc<dyn LocalHub>,
        options: Arc<BridgeOptions>,
    ) -> Self {
        let link = Arc::new(DeviceLink::new(id.clone(), name.clone(), api));
        let poller = Arc::new(PollingScheduler::new(options.push_enabled));
        Self {
            id,
            name,
            link,
            hub,
            poller,
            options,
            resolver: CapabilityResolver::standard(),
            bindings: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Build an accessory with one `add_component` call per device component.
    pub fn from_device(
        device: &Device,
        api: Arc<dyn SmartThingsApi>,
        hub: Arc<dyn LocalHub>,
        options: Arc<BridgeOptions>,
    ) -> Self {
        let mut accessory = Self::new(
            device.device_id.clone(),
            device.display_name().to_string(),
            api,
            hub,
            options,
        );
        for component in &device.components {
            accessory.add_component(&component.id, &component.capability_ids());
        }
        accessory
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn bindings(&self) -> &[Arc<dyn Service>] {
        &self.bindings
    }

    /// Resolve a component's capabilities and publish the resulting services.
    ///
    /// Meant to be called once per component; a second call for the same
    /// component adds a second set of bindings.
    pub fn add_component(&mut self, component_id: &str, capabilities: &[String]) {
        let resolved = self.resolver.resolve(capabilities);
        if resolved.is_empty() {
            debug!("[{}] Nothing to expose on component {}", self.name, component_id);
        }

        for resolution in resolved {
            let key = self.unique_key(&format!("{}.{}", component_id, resolution.kind));
            let ctx = ServiceContext::new(
                self.link.clone(),
                self.hub.clone(),
                self.poller.clone(),
                self.options.clone(),
                component_id.to_string(),
                resolution.capabilities.clone(),
                key,
                self.service_name(component_id),
            );
            let binding = services::build(resolution.kind, ctx);

            info!(
                "[{}] Exposing {} for {} [{}]",
                self.name,
                resolution.kind,
                component_id,
                resolution.capabilities.join(", ")
            );

            let index = self.bindings.len();
            for exposure in binding.exposures() {
                self.hub.add_service(
                    &exposure.key,
                    exposure.service_type,
                    &exposure.name,
                    &exposure.characteristics,
                );
                self.routes
                    .insert(exposure.key, (index, exposure.characteristics));
            }
            self.bindings.push(binding);
        }
    }

    fn unique_key(&self, subtype: &str) -> ServiceKey {
        let mut key = ServiceKey::new(self.id.clone(), subtype);
        let mut n = 2;
        while self.routes.contains_key(&key) {
            key = ServiceKey::new(self.id.clone(), format!("{}.{}", subtype, n));
            n += 1;
        }
        key
    }

    fn service_name(&self, component_id: &str) -> String {
        if component_id == "main" {
            self.name.clone()
        } else {
            format!("{} {}", self.name, component_id)
        }
    }

    pub async fn refresh_status(&self) -> bool {
        self.link.refresh_status().await
    }

    pub fn force_next_status_refresh(&self) {
        self.link.force_next_status_refresh();
    }

    pub async fn send_command(&self, command: Command) -> bool {
        self.link.send_command(command).await
    }

    pub async fn send_commands(&self, commands: &[Command]) -> bool {
        self.link.send_commands(commands).await
    }

    pub fn is_online(&self) -> bool {
        self.link.is_online()
    }

    /// Start the reachability probe, then the poll timers of every binding
    /// whose group has an interval.
    pub fn start_polling(&self) {
        self.poller.start_health_checks(&self.link, HEALTH_CHECK_INTERVAL);
        if self.poller.is_suppressed() {
            debug!("[{}] Push events configured, not polling", self.name);
            return;
        }
        for binding in &self.bindings {
            for spec in binding.polls() {
                match self.options.poll_interval(spec.group) {
                    Some(interval) => self.poller.start_polling_state(binding, spec, interval),
                    None => trace!("[{}] Polling disabled for {:?}", self.name, spec.group),
                }
            }
        }
    }

    /// Forward an event to the binding claiming its component and capability.
    pub fn process_event(&self, event: &DeviceEvent) {
        let binding = self.bindings.iter().find(|b| {
            let ctx = b.context();
            ctx.component_id() == event.component_id && ctx.claims(&event.capability)
        });
        match binding {
            Some(binding) if !binding.is_retired() => binding.process_event(event),
            Some(_) => trace!("[{}] Binding for {} is retired", self.name, event.capability),
            None => trace!(
                "[{}] No binding for {}/{}",
                self.name, event.component_id, event.capability
            ),
        }
    }

    fn route(&self, key: &ServiceKey, characteristic: Characteristic) -> Result<&Arc<dyn Service>, HubError> {
        let (index, characteristics) = self
            .routes
            .get(key)
            .ok_or_else(|| HubError::UnknownService(key.clone()))?;
        let binding = self
            .bindings
            .get(*index)
            .filter(|b| !b.is_retired())
            .ok_or_else(|| HubError::UnknownService(key.clone()))?;
        if !characteristics.contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        Ok(binding)
    }

    /// Host read of one characteristic.
    pub async fn get(&self, key: &ServiceKey, characteristic: Characteristic) -> Result<CharValue, HubError> {
        self.route(key, characteristic)?.get(characteristic).await
    }

    /// Host write of one characteristic.
    pub async fn set(
        &self,
        key: &ServiceKey,
        characteristic: Characteristic,
        value: CharValue,
    ) -> Result<(), HubError> {
        self.route(key, characteristic)?.set(characteristic, value).await
    }
}
