//! Discovery and the registry of exposed accessories.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock;

use anyhow::Context;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::accessory::MultiServiceAccessory;
use crate::config::BridgeOptions;
use crate::config::SmartThingsConfig;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::LocalHub;
use crate::hub::ServiceKey;
use crate::smartthings::DeviceEvent;
use crate::smartthings::SmartThingsApi;

/// Every accessory the bridge exposes, keyed by device id.
pub struct Bridge {
    api: Arc<dyn SmartThingsApi>,
    hub: Arc<dyn LocalHub>,
    options: Arc<BridgeOptions>,
    webhook_token: Option<String>,
    ignore_locations: Vec<String>,
    accessories: RwLock<BTreeMap<String, Arc<MultiServiceAccessory>>>,
}

impl Bridge {
    pub fn new(
        api: Arc<dyn SmartThingsApi>,
        hub: Arc<dyn LocalHub>,
        config: &SmartThingsConfig,
    ) -> Self {
        Self {
            api,
            hub,
            options: Arc::new(BridgeOptions::from(config)),
            webhook_token: config.webhook_token.clone(),
            ignore_locations: config.ignore_locations.clone(),
            accessories: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn webhook_token(&self) -> Option<&str> {
        self.webhook_token.as_deref()
    }

    pub fn accessory(&self, device_id: &str) -> Option<Arc<MultiServiceAccessory>> {
        self.accessories
            .read()
            .ok()
            .and_then(|accessories| accessories.get(device_id).cloned())
    }

    pub fn accessory_ids(&self) -> Vec<String> {
        self.accessories
            .read()
            .map(|accessories| accessories.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Location ids whose names appear in `IgnoreLocations`.
    async fn ignored_location_ids(&self) -> anyhow::Result<HashSet<String>> {
        if self.ignore_locations.is_empty() {
            return Ok(HashSet::new());
        }
        let locations = self
            .api
            .list_locations()
            .await
            .context("Failed to list locations")?;

        let ignored: HashSet<String> = locations
            .into_iter()
            .filter(|location| {
                self.ignore_locations
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&location.name))
            })
            .map(|location| {
                info!("Ignoring devices in location {}", location.name);
                location.location_id
            })
            .collect();
        Ok(ignored)
    }

    /// Register an accessory for every new device and start its polling.
    ///
    /// Returns the number of accessories added. A device with nothing to
    /// expose is skipped without affecting the others.
    pub async fn discover(&self) -> anyhow::Result<usize> {
        let ignored = self.ignored_location_ids().await?;
        let devices = self
            .api
            .list_devices()
            .await
            .context("Failed to list devices")?;
        info!("Found {} devices", devices.len());

        let mut added = 0;
        for device in devices {
            let name = device.display_name().to_string();
            if device
                .location_id
                .as_ref()
                .is_some_and(|id| ignored.contains(id))
            {
                debug!("[{}] In an ignored location, skipping", name);
                continue;
            }
            if self.accessory(&device.device_id).is_some() {
                debug!("[{}] Already registered", name);
                continue;
            }

            let accessory = MultiServiceAccessory::from_device(
                &device,
                self.api.clone(),
                self.hub.clone(),
                self.options.clone(),
            );
            if accessory.bindings().is_empty() {
                warn!("[{}] No supported capabilities, not exposing device", name);
                continue;
            }

            accessory.start_polling();
            if let Ok(mut accessories) = self.accessories.write() {
                accessories.insert(device.device_id.clone(), Arc::new(accessory));
                added += 1;
            }
        }

        info!("Registered {} accessories", added);
        Ok(added)
    }

    /// Route a pushed event to its accessory. Returns `false` for unknown devices.
    pub fn dispatch_event(&self, event: &DeviceEvent) -> bool {
        match self.accessory(&event.device_id) {
            Some(accessory) => {
                accessory.process_event(event);
                true
            }
            None => {
                debug!("Dropping event for unknown device {}", event.device_id);
                false
            }
        }
    }

    fn accessory_for(&self, key: &ServiceKey) -> Result<Arc<MultiServiceAccessory>, HubError> {
        self.accessory(&key.accessory_id)
            .ok_or_else(|| HubError::UnknownService(key.clone()))
    }

    pub async fn get(&self, key: &ServiceKey, characteristic: Characteristic) -> Result<CharValue, HubError> {
        self.accessory_for(key)?.get(key, characteristic).await
    }

    pub async fn set(
        &self,
        key: &ServiceKey,
        characteristic: Characteristic,
        value: CharValue,
    ) -> Result<(), HubError> {
        self.accessory_for(key)?.set(key, characteristic, value).await
    }
}
