//! Optimistic target state with bounded confirmation polling.
//!
//! Used by locks, garage doors and window coverings. Setting a target marks
//! it pending, then a confirmation task polls the device every
//! [`CONFIRM_INTERVAL`] until the reported state matches, or gives up after
//! [`CONFIRM_ATTEMPTS`]. Reads of the target fall back to the reported state
//! once the transition window has elapsed.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::ServiceContext;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::smartthings::ComponentStatus;
use crate::smartthings::StatusError;

pub const CONFIRM_INTERVAL: Duration = Duration::from_secs(2);
pub const CONFIRM_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Idle,
    Pending {
        target: i64,
        since: Instant,
        attempts_left: u32,
    },
}

/// Result of feeding one confirmation poll into the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Confirmed(i64),
    Waiting,
    GaveUp,
}

pub type CurrentReader = fn(&ComponentStatus) -> Result<i64, StatusError>;

#[derive(Debug)]
pub struct TargetTracker {
    window: Duration,
    phase: Mutex<Phase>,
    confirmation: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TargetTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            phase: Mutex::new(Phase::Idle),
            confirmation: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    /// Record a requested target before the command goes out.
    pub fn begin(&self, target: i64) {
        *lock(&self.phase) = Phase::Pending {
            target,
            since: Instant::now(),
            attempts_left: CONFIRM_ATTEMPTS,
        };
    }

    /// Drop the pending target, stopping any confirmation in progress.
    pub fn cancel(&self) {
        *lock(&self.phase) = Phase::Idle;
        if let Some(handle) = lock(&self.confirmation).take() {
            handle.abort();
        }
    }

    /// Target to report, given the target implied by the reported state.
    ///
    /// A pending target is trusted only within the transition window; after
    /// that the reported state is adopted. Reads never end a confirmation.
    pub fn target_or(&self, reported: i64) -> i64 {
        match *lock(&self.phase) {
            Phase::Pending { target, since, .. } if since.elapsed() <= self.window => target,
            Phase::Pending { .. } | Phase::Idle => reported,
        }
    }

    /// Feed one poll result. `reported` is `None` when the poll failed.
    pub fn observe(&self, reported: Option<i64>) -> Step {
        let mut phase = lock(&self.phase);
        let Phase::Pending {
            target,
            since,
            attempts_left,
        } = *phase
        else {
            return Step::GaveUp;
        };

        if reported == Some(target) {
            *phase = Phase::Idle;
            return Step::Confirmed(target);
        }
        if attempts_left <= 1 {
            *phase = Phase::Idle;
            return Step::GaveUp;
        }
        *phase = Phase::Pending {
            target,
            since,
            attempts_left: attempts_left - 1,
        };
        Step::Waiting
    }

    /// Poll until the reported `current` characteristic reaches the pending
    /// target, then push it. Replaces any confirmation already running.
    pub fn confirm(
        self: &Arc<Self>,
        ctx: ServiceContext,
        current: Characteristic,
        read: CurrentReader,
    ) {
        let tracker = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + CONFIRM_INTERVAL, CONFIRM_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    return;
                };

                ctx.link().force_next_status_refresh();
                let reported = match ctx.status().await {
                    Ok(status) => read(&status).ok(),
                    Err(_) => None,
                };

                match tracker.observe(reported) {
                    Step::Confirmed(state) => {
                        debug!("[{}] {} reached {}", ctx.name(), current, state);
                        ctx.update(current, CharValue::Int(state));
                        return;
                    }
                    Step::Waiting => {}
                    Step::GaveUp => {
                        debug!("[{}] {} never confirmed", ctx.name(), current);
                        return;
                    }
                }
            }
        });

        if let Some(previous) = lock(&self.confirmation).replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for TargetTracker {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.confirmation).take() {
            handle.abort();
        }
    }
}
