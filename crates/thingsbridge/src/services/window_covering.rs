use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::int_arg;
use super::transition::Phase;
use super::transition::TargetTracker;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::hub::position_state;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

const TRANSITION_WINDOW: Duration = Duration::from_secs(20);

/// Position 0-100. Prefers the numeric level, falls back to the named state.
fn current_position(status: &ComponentStatus) -> Result<i64, StatusError> {
    if status.has_capability("windowShadeLevel") {
        let level = status.number("windowShadeLevel", "shadeLevel")?;
        return Ok(level.round().clamp(0.0, 100.0) as i64);
    }
    Ok(match status.text("windowShade", "windowShade")? {
        "open" => 100,
        "closed" => 0,
        _ => 50,
    })
}

/// WindowCovering over `windowShade` and/or `windowShadeLevel`.
pub struct WindowCoveringService {
    ctx: ServiceContext,
    tracker: Arc<TargetTracker>,
}

impl WindowCoveringService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            tracker: Arc::new(TargetTracker::new(TRANSITION_WINDOW)),
        }
    }

    fn movement(&self, status: &ComponentStatus, current: i64) -> i64 {
        if self.ctx.claims("windowShade") {
            match status.text("windowShade", "windowShade") {
                Ok("opening") => return position_state::INCREASING,
                Ok("closing") => return position_state::DECREASING,
                Ok(_) => return position_state::STOPPED,
                Err(_) => {}
            }
        }
        match self.tracker.phase() {
            Phase::Pending { target, .. } if target > current => position_state::INCREASING,
            Phase::Pending { target, .. } if target < current => position_state::DECREASING,
            _ => position_state::STOPPED,
        }
    }

    fn project(&self, status: &ComponentStatus) {
        match current_position(status) {
            Ok(current) => {
                self.ctx.update(Characteristic::CurrentPosition, CharValue::Int(current));
                let target = self.tracker.target_or(current);
                self.ctx.update(Characteristic::TargetPosition, CharValue::Int(target));
                let movement = self.movement(status, current);
                self.ctx.update(Characteristic::PositionState, CharValue::Int(movement));
            }
            Err(e) => self.ctx.project(Characteristic::CurrentPosition, Err(e)),
        }
    }
}

#[async_trait]
impl Service for WindowCoveringService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::WindowCovering
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(
            ServiceType::WindowCovering,
            vec![
                Characteristic::CurrentPosition,
                Characteristic::TargetPosition,
                Characteristic::PositionState,
            ],
        )]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![
            self.ctx.poll_with_target(
                Characteristic::CurrentPosition,
                Characteristic::TargetPosition,
                PollGroup::WindowShades,
            ),
            self.ctx.poll(Characteristic::PositionState, PollGroup::WindowShades),
        ]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        let (status, current) = match characteristic {
            Characteristic::CurrentPosition
            | Characteristic::TargetPosition
            | Characteristic::PositionState => {
                let status = self.ctx.status().await?;
                let current = self.ctx.translate(current_position(&status))?;
                (status, current)
            }
            other => return Err(HubError::UnsupportedCharacteristic(other)),
        };
        let value = match characteristic {
            Characteristic::TargetPosition => self.tracker.target_or(current),
            Characteristic::PositionState => self.movement(&status, current),
            _ => current,
        };
        Ok(CharValue::Int(value))
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if characteristic != Characteristic::TargetPosition {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let requested = int_arg(characteristic, value)?.clamp(0, 100);

        let (target, capability, command, arguments) = if self.ctx.claims("windowShadeLevel") {
            (requested, "windowShadeLevel", "setShadeLevel", vec![json!(requested)])
        } else if requested >= 50 {
            (100, "windowShade", "open", vec![])
        } else {
            (0, "windowShade", "close", vec![])
        };

        self.tracker.begin(target);
        if let Err(e) = self.ctx.send_command(capability, command, arguments).await {
            self.tracker.cancel();
            return Err(e);
        }
        self.tracker
            .confirm(self.ctx.clone(), Characteristic::CurrentPosition, current_position);
        Ok(())
    }

    fn process_event(&self, event: &DeviceEvent) {
        if !matches!(event.capability.as_str(), "windowShade" | "windowShadeLevel") {
            return;
        }
        let status = self.ctx.event_status(event);
        self.project(&status);
    }
}
