//! Per-accessory snapshot of the remote device state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceStatus;

/// How long a fetched snapshot is served without asking the cloud again.
pub const FRESHNESS_WINDOW: Duration = Duration::from_millis(5000);

/// Outcome slot of a refresh in flight: `None` until the fetch settles.
type RefreshOutcome = watch::Receiver<Option<bool>>;

#[derive(Debug, Default)]
struct CacheState {
    /// When the snapshot was last replaced. `None` forces the next refresh.
    fetched_at: Option<Instant>,
    components: HashMap<String, Arc<ComponentStatus>>,
    in_flight: Option<RefreshOutcome>,
}

/// Cached status with a freshness window and at most one refresh in flight.
///
/// Concurrent callers of [`StatusCache::refresh`] share the outcome of the
/// single fetch that is running instead of starting their own.
#[derive(Debug)]
pub struct StatusCache {
    freshness: Duration,
    state: Mutex<CacheState>,
}

enum Role {
    Leader(watch::Sender<Option<bool>>),
    Follower(RefreshOutcome),
}

/// Clears the in-flight slot even if the leading fetch is cancelled.
struct InFlightSlot<'a> {
    cache: &'a StatusCache,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.cache.lock().in_flight = None;
    }
}

impl StatusCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_fresh(&self) -> bool {
        self.lock()
            .fetched_at
            .is_some_and(|at| at.elapsed() <= self.freshness)
    }

    /// Forget the snapshot age so the next refresh always fetches.
    pub fn invalidate(&self) {
        self.lock().fetched_at = None;
    }

    /// Latest snapshot of one component; empty if it was never reported.
    pub fn component(&self, component_id: &str) -> Arc<ComponentStatus> {
        self.lock()
            .components
            .get(component_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace every component snapshot and restart the freshness window.
    pub fn store(&self, status: DeviceStatus) {
        let mut state = self.lock();
        state.components = status
            .components
            .into_iter()
            .map(|(id, component)| (id, Arc::new(component)))
            .collect();
        state.fetched_at = Some(Instant::now());
    }

    /// Bring the snapshot up to date.
    ///
    /// Returns `true` straight away while fresh. Otherwise joins the refresh
    /// already in flight, or runs `fetch` and stores its result. `fetch`
    /// yields `None` on failure, which leaves the old snapshot in place.
    pub async fn refresh<F, Fut>(&self, fetch: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<DeviceStatus>>,
    {
        let role = {
            let mut state = self.lock();
            if state
                .fetched_at
                .is_some_and(|at| at.elapsed() <= self.freshness)
            {
                trace!("Status cache is fresh");
                return true;
            }
            match &state.in_flight {
                Some(outcome) => Role::Follower(outcome.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut outcome) => {
                trace!("Joining refresh already in flight");
                match outcome.wait_for(Option::is_some).await {
                    Ok(settled) => (*settled).unwrap_or(false),
                    // Leader was cancelled before settling.
                    Err(_) => false,
                }
            }
            Role::Leader(tx) => {
                let slot = InFlightSlot { cache: self };
                let success = match fetch().await {
                    Some(status) => {
                        self.store(status);
                        true
                    }
                    None => false,
                };
                drop(slot);
                let _ = tx.send(Some(success));
                success
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;

    fn snapshot(level: i64) -> DeviceStatus {
        serde_json::from_value(json!({
            "components": { "main": { "switchLevel": { "level": { "value": level } } } }
        }))
        .unwrap()
    }

    async fn counted_fetch(calls: &AtomicUsize, result: Option<DeviceStatus>) -> Option<DeviceStatus> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_snapshot_skips_fetch() {
        let cache = StatusCache::new(FRESHNESS_WINDOW);
        let calls = AtomicUsize::new(0);

        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(10)))).await);
        tokio::time::advance(Duration::from_millis(4000)).await;
        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(20)))).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.component("main").number("switchLevel", "level").unwrap(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_is_refetched() {
        let cache = StatusCache::new(FRESHNESS_WINDOW);
        let calls = AtomicUsize::new(0);

        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(10)))).await);
        tokio::time::advance(Duration::from_millis(5500)).await;
        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(20)))).await);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.component("main").number("switchLevel", "level").unwrap(), 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_fetch_inside_window() {
        let cache = StatusCache::new(FRESHNESS_WINDOW);
        let calls = AtomicUsize::new(0);

        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(10)))).await);
        cache.invalidate();
        assert!(!cache.is_fresh());
        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(20)))).await);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let cache = StatusCache::new(FRESHNESS_WINDOW);
        let calls = AtomicUsize::new(0);

        let (a, b, c) = tokio::join!(
            cache.refresh(|| counted_fetch(&calls, Some(snapshot(1)))),
            cache.refresh(|| counted_fetch(&calls, Some(snapshot(2)))),
            cache.refresh(|| counted_fetch(&calls, Some(snapshot(3)))),
        );

        assert!(a && b && c);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.component("main").number("switchLevel", "level").unwrap(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_observe_failed_fetch() {
        let cache = StatusCache::new(FRESHNESS_WINDOW);
        let calls = AtomicUsize::new(0);

        let (a, b) = tokio::join!(
            cache.refresh(|| counted_fetch(&calls, None)),
            cache.refresh(|| counted_fetch(&calls, Some(snapshot(2)))),
        );

        assert!(!a && !b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_fresh());
        assert!(cache.component("main").value("switchLevel", "level").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_releases_slot() {
        let cache = StatusCache::new(FRESHNESS_WINDOW);
        let calls = AtomicUsize::new(0);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            cache.refresh(|| counted_fetch(&calls, Some(snapshot(1)))),
        )
        .await;
        assert!(cancelled.is_err());

        assert!(cache.refresh(|| counted_fetch(&calls, Some(snapshot(2)))).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
