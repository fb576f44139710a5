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
use crate::hub::door_state;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

const TRANSITION_WINDOW: Duration = Duration::from_secs(20);

fn current_state(status: &ComponentStatus) -> Result<i64, StatusError> {
    Ok(match status.text("doorControl", "door")? {
        "open" => door_state::OPEN,
        "closed" => door_state::CLOSED,
        "opening" => door_state::OPENING,
        "closing" => door_state::CLOSING,
        _ => door_state::STOPPED,
    })
}

fn implied_target(current: i64) -> i64 {
    match current {
        door_state::CLOSED | door_state::CLOSING => door_state::CLOSED,
        _ => door_state::OPEN,
    }
}

/// GarageDoorOpener over `doorControl`.
pub struct GarageDoorService {
    ctx: ServiceContext,
    tracker: Arc<TargetTracker>,
}

impl GarageDoorService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            tracker: Arc::new(TargetTracker::new(TRANSITION_WINDOW)),
        }
    }
}

#[async_trait]
impl Service for GarageDoorService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::GarageDoor
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(
            ServiceType::GarageDoorOpener,
            vec![
                Characteristic::CurrentDoorState,
                Characteristic::TargetDoorState,
                Characteristic::ObstructionDetected,
            ],
        )]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![self.ctx.poll_with_target(
            Characteristic::CurrentDoorState,
            Characteristic::TargetDoorState,
            PollGroup::Doors,
        )]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        match characteristic {
            Characteristic::CurrentDoorState => {
                let status = self.ctx.status().await?;
                self.ctx.translate(current_state(&status)).map(CharValue::Int)
            }
            Characteristic::TargetDoorState => {
                let status = self.ctx.status().await?;
                let current = self.ctx.translate(current_state(&status))?;
                Ok(CharValue::Int(self.tracker.target_or(implied_target(current))))
            }
            // No obstruction sensing on the remote side.
            Characteristic::ObstructionDetected => Ok(CharValue::Bool(false)),
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if characteristic != Characteristic::TargetDoorState {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let target = int_arg(characteristic, value)?;
        let command = match target {
            door_state::OPEN => "open",
            door_state::CLOSED => "close",
            _ => {
                return Err(HubError::InvalidValue {
                    characteristic,
                    value,
                });
            }
        };

        self.tracker.begin(target);
        if let Err(e) = self.ctx.send_command("doorControl", command, vec![]).await {
            self.tracker.cancel();
            return Err(e);
        }
        self.tracker
            .confirm(self.ctx.clone(), Characteristic::CurrentDoorState, current_state);
        Ok(())
    }

    fn process_event(&self, event: &DeviceEvent) {
        if event.capability != "doorControl" {
            return;
        }
        let status = self.ctx.event_status(event);
        match current_state(&status) {
            Ok(current) => {
                self.ctx.update(Characteristic::CurrentDoorState, CharValue::Int(current));
                let target = self.tracker.target_or(implied_target(current));
                self.ctx.update(Characteristic::TargetDoorState, CharValue::Int(target));
            }
            Err(e) => self.ctx.project(Characteristic::CurrentDoorState, Err(e)),
        }
    }
}
