use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::int_arg;
use super::transition::TargetTracker;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::hub::lock_state;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

const TRANSITION_WINDOW: Duration = Duration::from_secs(10);

fn current_state(status: &ComponentStatus) -> Result<i64, StatusError> {
    Ok(match status.text("lock", "lock")? {
        "locked" => lock_state::SECURED,
        "unlocked" | "unlocked with timeout" => lock_state::UNSECURED,
        "jammed" => lock_state::JAMMED,
        _ => lock_state::UNKNOWN,
    })
}

/// Target implied by a reported state.
fn implied_target(current: i64) -> i64 {
    if current == lock_state::SECURED {
        lock_state::SECURED
    } else {
        lock_state::UNSECURED
    }
}

/// LockMechanism over `lock`.
pub struct LockService {
    ctx: ServiceContext,
    tracker: Arc<TargetTracker>,
}

impl LockService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            tracker: Arc::new(TargetTracker::new(TRANSITION_WINDOW)),
        }
    }
}

#[async_trait]
impl Service for LockService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Lock
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(
            ServiceType::LockMechanism,
            vec![Characteristic::LockCurrentState, Characteristic::LockTargetState],
        )]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![self.ctx.poll_with_target(
            Characteristic::LockCurrentState,
            Characteristic::LockTargetState,
            PollGroup::Locks,
        )]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        let current = match characteristic {
            Characteristic::LockCurrentState | Characteristic::LockTargetState => {
                let status = self.ctx.status().await?;
                self.ctx.translate(current_state(&status))?
            }
            other => return Err(HubError::UnsupportedCharacteristic(other)),
        };
        if characteristic == Characteristic::LockTargetState {
            return Ok(CharValue::Int(self.tracker.target_or(implied_target(current))));
        }
        Ok(CharValue::Int(current))
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if characteristic != Characteristic::LockTargetState {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let target = int_arg(characteristic, value)?;
        let command = match target {
            lock_state::SECURED => "lock",
            lock_state::UNSECURED => "unlock",
            _ => {
                return Err(HubError::InvalidValue {
                    characteristic,
                    value,
                });
            }
        };

        self.tracker.begin(target);
        if let Err(e) = self.ctx.send_command("lock", command, vec![]).await {
            self.tracker.cancel();
            return Err(e);
        }
        self.tracker
            .confirm(self.ctx.clone(), Characteristic::LockCurrentState, current_state);
        Ok(())
    }

    fn process_event(&self, event: &DeviceEvent) {
        if event.capability != "lock" {
            return;
        }
        let status = self.ctx.event_status(event);
        match current_state(&status) {
            Ok(current) => {
                self.ctx.update(Characteristic::LockCurrentState, CharValue::Int(current));
                let target = self.tracker.target_or(implied_target(current));
                self.ctx.update(Characteristic::LockTargetState, CharValue::Int(target));
            }
            Err(e) => self
                .ctx
                .project(Characteristic::LockCurrentState, Err(e)),
        }
    }
}
