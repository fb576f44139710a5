use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;
use tracing::debug;
use tracing::trace;

use super::CharValue;
use super::Characteristic;
use super::LocalHub;
use super::ServiceKey;
use super::ServiceType;

/// A published service and the last value pushed for each characteristic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubService {
    pub key: ServiceKey,
    pub service_type: ServiceType,
    pub name: String,
    pub values: BTreeMap<Characteristic, Option<CharValue>>,
}

/// In-process hub that keeps the published services in memory.
///
/// Removed services stay removed: later updates addressed to them are dropped.
#[derive(Debug, Default)]
pub struct MemoryHub {
    services: RwLock<BTreeMap<ServiceKey, HubService>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every published service, ordered by key
    pub fn services(&self) -> Vec<HubService> {
        self.services
            .read()
            .map(|services| services.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn service(&self, key: &ServiceKey) -> Option<HubService> {
        self.services
            .read()
            .ok()
            .and_then(|services| services.get(key).cloned())
    }

    /// Last value pushed for a characteristic, if any
    pub fn value(&self, key: &ServiceKey, characteristic: Characteristic) -> Option<CharValue> {
        self.service(key)
            .and_then(|service| service.values.get(&characteristic).copied().flatten())
    }
}

impl LocalHub for MemoryHub {
    fn add_service(
        &self,
        key: &ServiceKey,
        service_type: ServiceType,
        name: &str,
        characteristics: &[Characteristic],
    ) {
        let service = HubService {
            key: key.clone(),
            service_type,
            name: name.to_string(),
            values: characteristics.iter().map(|c| (*c, None)).collect(),
        };
        if let Ok(mut services) = self.services.write() {
            debug!("Hub: added {} service {}", service_type, key);
            services.insert(key.clone(), service);
        }
    }

    fn update_characteristic(&self, key: &ServiceKey, characteristic: Characteristic, value: CharValue) {
        let Ok(mut services) = self.services.write() else {
            return;
        };
        match services.get_mut(key) {
            Some(service) => {
                trace!("Hub: {} {} = {}", key, characteristic, value);
                service.values.insert(characteristic, Some(value));
            }
            None => trace!("Hub: dropping update for unknown service {}", key),
        }
    }

    fn remove_service(&self, key: &ServiceKey) {
        if let Ok(mut services) = self.services.write() {
            if services.remove(key).is_some() {
                debug!("Hub: removed service {}", key);
            }
        }
    }
}
