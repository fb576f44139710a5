//! Per-characteristic poll timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::trace;

use super::DeviceLink;
use crate::hub::Characteristic;
use crate::hub::ServiceKey;
use crate::services::PollSpec;
use crate::services::Service;

/// Polls are skipped while a command is in flight or completed this recently.
pub const COMMAND_QUIET_PERIOD: Duration = Duration::from_secs(20);

/// Offline accessories re-probe reachability this long after the last failure.
pub const OFFLINE_REPROBE_INTERVAL: Duration = Duration::from_secs(600);

/// Interval of the reachability probe every accessory runs.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Upper bound of the random delay added to every poll interval.
pub const MAX_JITTER: Duration = Duration::from_millis(1000);

type TaskKey = (ServiceKey, Characteristic);

/// Owns the poll timers of one accessory.
///
/// Timers hold only a weak reference to their binding, so a dropped binding
/// ends its timers on their next tick. Dropping the scheduler aborts them all.
#[derive(Debug)]
pub struct PollingScheduler {
    /// Push events are configured; no timer is ever started.
    suppressed: bool,
    tasks: Mutex<HashMap<TaskKey, JoinHandle<()>>>,
    health: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn new(push_enabled: bool) -> Self {
        Self {
            suppressed: push_enabled,
            tasks: Mutex::new(HashMap::new()),
            health: Mutex::new(None),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn health(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Number of timers currently registered.
    pub fn active(&self) -> usize {
        self.tasks().values().filter(|h| !h.is_finished()).count()
    }

    /// Start a repeating poll of `spec.characteristic` every `interval` plus
    /// a random jitter, pushing each value to the hub.
    ///
    /// A poll is skipped while the accessory has command activity within
    /// [`COMMAND_QUIET_PERIOD`]. While the accessory is offline the tick
    /// re-probes reachability instead of polling.
    pub fn start_polling_state(&self, service: &Arc<dyn Service>, spec: PollSpec, interval: Duration) {
        if self.suppressed {
            trace!("Push events configured, not polling {}", spec.key);
            return;
        }

        let jitter = Duration::from_millis(
            rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64),
        );
        let period = interval + jitter;
        let binding: Weak<dyn Service> = Arc::downgrade(service);
        let task_key = (spec.key.clone(), spec.characteristic);

        debug!(
            "[{}] Polling {} every {:?}",
            service.context().name(),
            spec.characteristic,
            period
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(service) = binding.upgrade() else {
                    return;
                };
                if service.is_retired() {
                    return;
                }
                poll_once(service.as_ref(), &spec).await;
            }
        });

        if let Some(previous) = self.tasks().insert(task_key, handle) {
            previous.abort();
        }
    }

    /// Probe the device's reachability every `interval`.
    ///
    /// Runs whether or not push events are configured. While the accessory
    /// is offline a tick only re-probes once [`OFFLINE_REPROBE_INTERVAL`]
    /// has passed since the last failure.
    pub fn start_health_checks(&self, link: &Arc<DeviceLink>, interval: Duration) {
        let link = Arc::downgrade(link);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(link) = link.upgrade() else {
                    return;
                };
                if link.is_online() {
                    link.check_health().await;
                } else {
                    link.reprobe_if_due(OFFLINE_REPROBE_INTERVAL).await;
                }
            }
        });

        if let Some(previous) = self.health().replace(handle) {
            previous.abort();
        }
    }

    /// Stop every timer of one hub service.
    pub fn cancel_service(&self, key: &ServiceKey) {
        self.tasks().retain(|(service_key, characteristic), handle| {
            if service_key == key {
                debug!("Poll timer for {} {} cancelled", service_key, characteristic);
                handle.abort();
                false
            } else {
                true
            }
        });
    }
}

async fn poll_once(service: &dyn Service, spec: &PollSpec) {
    let ctx = service.context();
    let link = ctx.link();

    if !link.is_online() {
        link.reprobe_if_due(OFFLINE_REPROBE_INTERVAL).await;
        return;
    }
    if link.command_recently_active(COMMAND_QUIET_PERIOD) {
        trace!("[{}] Recent command, skipping poll of {}", ctx.name(), spec.characteristic);
        return;
    }

    match service.get(spec.characteristic).await {
        Ok(value) => ctx.update_on(&spec.key, spec.characteristic, value),
        Err(e) => {
            debug!("[{}] Poll of {} failed: {}", ctx.name(), spec.characteristic, e);
            return;
        }
    }

    if let Some(target) = spec.target {
        if let Ok(value) = service.get(target).await {
            ctx.update_on(&spec.key, target, value);
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks().drain() {
            handle.abort();
        }
        if let Some(handle) = self.health().take() {
            handle.abort();
        }
    }
}
