//! Remote session of one accessory: status cache, command gate and health.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::status::FRESHNESS_WINDOW;
use super::status::StatusCache;
use crate::smartthings::Command;
use crate::smartthings::ComponentStatus;
use crate::smartthings::SmartThingsApi;

/// Consecutive refresh failures after which the accessory is marked offline.
pub const OFFLINE_AFTER_FAILURES: u32 = 5;

#[derive(Debug)]
struct Health {
    online: bool,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Everything a binding needs to talk to its remote device.
///
/// Commands are serialized: a command waits until no other command is in
/// flight. A status refresh waits for the command in flight, if any, but a
/// command does not wait for a refresh.
pub struct DeviceLink {
    device_id: String,
    label: String,
    api: Arc<dyn SmartThingsApi>,
    cache: StatusCache,
    /// `true` while a command batch is being posted.
    command_in_flight: watch::Sender<bool>,
    last_command_at: Mutex<Option<Instant>>,
    health: Mutex<Health>,
}

/// Marks the command gate busy for as long as it lives.
struct CommandSlot<'a> {
    gate: &'a watch::Sender<bool>,
}

impl Drop for CommandSlot<'_> {
    fn drop(&mut self) {
        self.gate.send_replace(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeviceLink {
    pub fn new(device_id: String, label: String, api: Arc<dyn SmartThingsApi>) -> Self {
        let (command_in_flight, _) = watch::channel(false);
        Self {
            device_id,
            label,
            api,
            cache: StatusCache::new(FRESHNESS_WINDOW),
            command_in_flight,
            last_command_at: Mutex::new(None),
            health: Mutex::new(Health {
                online: true,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Latest cached status of one component.
    pub fn component_status(&self, component_id: &str) -> Arc<ComponentStatus> {
        self.cache.component(component_id)
    }

    pub fn is_online(&self) -> bool {
        lock(&self.health).online
    }

    /// Make sure the cached status is no older than the freshness window.
    ///
    /// Transport failures count towards the offline threshold and yield
    /// `false`; they are not retried here.
    pub async fn refresh_status(&self) -> bool {
        self.cache
            .refresh(|| async {
                self.wait_for_commands().await;
                match self.api.device_status(&self.device_id).await {
                    Ok(status) => {
                        lock(&self.health).consecutive_failures = 0;
                        Some(status)
                    }
                    Err(e) => {
                        warn!("[{}] Failed to refresh status: {}", self.label, e);
                        self.record_failure();
                        None
                    }
                }
            })
            .await
    }

    /// Make the next [`DeviceLink::refresh_status`] fetch regardless of age.
    pub fn force_next_status_refresh(&self) {
        self.cache.invalidate();
    }

    pub async fn send_command(&self, command: Command) -> bool {
        self.send_commands(std::slice::from_ref(&command)).await
    }

    /// Post a batch of commands once no other command is in flight.
    pub async fn send_commands(&self, commands: &[Command]) -> bool {
        let slot = self.acquire_command_slot().await;
        debug!("[{}] Sending {:?}", self.label, commands);

        let success = match self.api.execute_commands(&self.device_id, commands).await {
            Ok(()) => {
                self.cache.invalidate();
                true
            }
            Err(e) => {
                error!("[{}] Command failed: {}", self.label, e);
                false
            }
        };

        *lock(&self.last_command_at) = Some(Instant::now());
        drop(slot);
        success
    }

    /// Whether a command is in flight or completed within `quiet_period`.
    pub fn command_recently_active(&self, quiet_period: Duration) -> bool {
        if *self.command_in_flight.borrow() {
            return true;
        }
        lock(&self.last_command_at).is_some_and(|at| at.elapsed() < quiet_period)
    }

    /// Ask the cloud whether the device is reachable.
    ///
    /// A positive answer marks the accessory online and clears the failure
    /// counter. Anything else marks it offline until a later probe succeeds.
    pub async fn check_health(&self) -> bool {
        let online = match self.api.device_health(&self.device_id).await {
            Ok(health) => health.is_online(),
            Err(e) => {
                warn!("[{}] Health probe failed: {}", self.label, e);
                false
            }
        };

        let mut health = lock(&self.health);
        if online {
            if !health.online {
                info!("[{}] Device is back online", self.label);
            }
            health.online = true;
            health.consecutive_failures = 0;
        } else {
            if health.online {
                warn!("[{}] Device is unreachable, marking offline", self.label);
            }
            health.online = false;
            health.last_failure = Some(Instant::now());
        }
        online
    }

    /// Re-probe reachability if at least `interval` passed since the last
    /// failure. Returns whether the accessory is online afterwards.
    pub async fn reprobe_if_due(&self, interval: Duration) -> bool {
        let due = {
            let health = lock(&self.health);
            if health.online {
                return true;
            }
            health.last_failure.is_none_or(|at| at.elapsed() >= interval)
        };
        if !due {
            return false;
        }
        debug!("[{}] Re-probing reachability", self.label);
        self.check_health().await
    }

    fn record_failure(&self) {
        let mut health = lock(&self.health);
        health.consecutive_failures += 1;
        health.last_failure = Some(Instant::now());
        if health.online && health.consecutive_failures >= OFFLINE_AFTER_FAILURES {
            warn!(
                "[{}] Marking offline after {} consecutive failures",
                self.label, health.consecutive_failures
            );
            health.online = false;
        }
    }

    async fn wait_for_commands(&self) {
        let mut rx = self.command_in_flight.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|busy| !busy).await;
    }

    async fn acquire_command_slot(&self) -> CommandSlot<'_> {
        let mut rx = self.command_in_flight.subscribe();
        loop {
            let _ = rx.wait_for(|busy| !busy).await;
            let acquired = self.command_in_flight.send_if_modified(|busy| {
                if *busy {
                    false
                } else {
                    *busy = true;
                    true
                }
            });
            if acquired {
                return CommandSlot {
                    gate: &self.command_in_flight,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::smartthings::MockApi;

    fn link_with(api: Arc<MockApi>) -> DeviceLink {
        DeviceLink::new("dev-1".to_string(), "Test Device".to_string(), api)
    }

    fn switch_status(value: &str) -> serde_json::Value {
        json!({ "components": { "main": { "switch": { "switch": { "value": value } } } } })
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_twice_in_window_fetches_once() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        let link = link_with(api.clone());

        assert!(link.refresh_status().await);
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(link.refresh_status().await);

        assert_eq!(api.status_calls(), 1);
        assert_eq!(
            link.component_status("main").text("switch", "switch").unwrap(),
            "on"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_always_fetches() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        let link = link_with(api.clone());

        assert!(link.refresh_status().await);
        api.set_status(switch_status("off"));
        link.force_next_status_refresh();
        assert!(link.refresh_status().await);

        assert_eq!(api.status_calls(), 2);
        assert_eq!(
            link.component_status("main").text("switch", "switch").unwrap(),
            "off"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_command_invalidates_cache() {
        let api = Arc::new(MockApi::with_status(switch_status("off")));
        let link = link_with(api.clone());

        assert!(link.refresh_status().await);
        assert!(link.send_command(Command::new("switch", "on")).await);
        assert!(link.refresh_status().await);

        assert_eq!(api.status_calls(), 2);
        assert_eq!(api.sent(), vec![Command::new("switch", "on")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_keeps_cache_and_reports_false() {
        let api = Arc::new(MockApi::with_status(switch_status("off")));
        api.fail_commands.store(true, Ordering::SeqCst);
        let link = link_with(api.clone());

        assert!(link.refresh_status().await);
        assert!(!link.send_command(Command::new("switch", "on")).await);
        assert!(link.refresh_status().await);

        assert_eq!(api.status_calls(), 1);
        assert!(!link.command_recently_active(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_failures_mark_offline_and_probe_restores() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        api.fail_status.store(true, Ordering::SeqCst);
        let link = link_with(api.clone());

        for _ in 0..4 {
            assert!(!link.refresh_status().await);
        }
        assert!(link.is_online());
        assert!(!link.refresh_status().await);
        assert!(!link.is_online());

        assert!(link.check_health().await);
        assert!(link.is_online());

        // Counter was reset: four more failures keep it online.
        for _ in 0..4 {
            assert!(!link.refresh_status().await);
        }
        assert!(link.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_answer_marks_offline() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        let link = link_with(api.clone());

        api.healthy.store(false, Ordering::SeqCst);
        assert!(!link.check_health().await);
        assert!(!link.is_online());

        // Status still answers, but only a probe brings it back.
        assert!(link.refresh_status().await);
        assert!(!link.is_online());

        api.healthy.store(true, Ordering::SeqCst);
        assert!(link.check_health().await);
        assert!(link.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_streak() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        let link = link_with(api.clone());

        api.fail_status.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            assert!(!link.refresh_status().await);
        }
        api.fail_status.store(false, Ordering::SeqCst);
        assert!(link.refresh_status().await);

        api.fail_status.store(true, Ordering::SeqCst);
        link.force_next_status_refresh();
        for _ in 0..4 {
            assert!(!link.refresh_status().await);
        }
        assert!(link.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprobe_waits_for_interval() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        api.fail_status.store(true, Ordering::SeqCst);
        let link = link_with(api.clone());
        for _ in 0..5 {
            link.refresh_status().await;
        }
        assert!(!link.is_online());

        let interval = Duration::from_secs(600);
        assert!(!link.reprobe_if_due(interval).await);
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(interval).await;
        assert!(link.reprobe_if_due(interval).await);
        assert_eq!(api.health_calls.load(Ordering::SeqCst), 1);
        assert!(link.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_are_serialized() {
        let api = Arc::new(MockApi::with_status(switch_status("on")));
        api.set_latency(Duration::from_millis(300));
        let link = link_with(api.clone());

        let start = Instant::now();
        let (a, b) = tokio::join!(
            link.send_command(Command::new("switch", "on")),
            link.send_command(Command::new("switch", "off")),
        );

        assert!(a && b);
        assert!(start.elapsed() >= Duration::from_millis(600));
        assert_eq!(api.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_waits_for_command_in_flight() {
        let api = Arc::new(MockApi::with_status(switch_status("off")));
        api.set_latency(Duration::from_millis(300));
        let link = link_with(api.clone());

        let (sent, refreshed) = tokio::join!(link.send_command(Command::new("switch", "on")), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(link.command_recently_active(Duration::ZERO));
            let start = Instant::now();
            let ok = link.refresh_status().await;
            (ok, start.elapsed())
        });

        assert!(sent);
        assert!(refreshed.0);
        // 290ms left on the command plus 300ms for the fetch itself.
        assert!(refreshed.1 >= Duration::from_millis(590));
    }
}
