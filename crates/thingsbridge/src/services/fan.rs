use async_trait::async_trait;
use serde_json::json;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::bool_arg;
use super::int_arg;
use super::switch_on;
use super::units;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

/// Oscillation modes that mean the fan is not swinging.
const STILL_MODES: &[&str] = &["fixed", "off"];

pub(crate) fn swinging(status: &ComponentStatus) -> Result<bool, StatusError> {
    let mode = status.text("fanOscillationMode", "fanOscillationMode")?;
    Ok(!STILL_MODES.contains(&mode))
}

pub(crate) fn oscillation_mode(swing: bool) -> &'static str {
    if swing { "all" } else { "fixed" }
}

/// Fanv2 over `switch` + `fanSpeed`, optionally `fanOscillationMode`.
pub struct FanService {
    ctx: ServiceContext,
}

impl FanService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn characteristics(&self) -> Vec<Characteristic> {
        let mut characteristics = vec![Characteristic::Active, Characteristic::RotationSpeed];
        if self.ctx.claims("fanOscillationMode") {
            characteristics.push(Characteristic::SwingMode);
        }
        characteristics
    }
}

fn read(status: &ComponentStatus, characteristic: Characteristic) -> Option<Result<CharValue, StatusError>> {
    let value = match characteristic {
        Characteristic::Active => switch_on(status).map(|on| CharValue::Int(i64::from(on))),
        Characteristic::RotationSpeed => status
            .number("fanSpeed", "fanSpeed")
            .map(|step| CharValue::Int(units::fan_speed_to_percent(step))),
        Characteristic::SwingMode => swinging(status).map(|swing| CharValue::Int(i64::from(swing))),
        _ => return None,
    };
    Some(value)
}

#[async_trait]
impl Service for FanService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Fan
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(ServiceType::Fanv2, self.characteristics())]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![
            self.ctx.poll(Characteristic::Active, PollGroup::SwitchesAndLights),
            self.ctx.poll(Characteristic::RotationSpeed, PollGroup::SwitchesAndLights),
        ]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        if !self.characteristics().contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let status = self.ctx.status().await?;
        match read(&status, characteristic) {
            Some(value) => self.ctx.translate(value),
            None => Err(HubError::UnsupportedCharacteristic(characteristic)),
        }
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if !self.characteristics().contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        match characteristic {
            Characteristic::Active => {
                let command = if bool_arg(characteristic, value)? { "on" } else { "off" };
                self.ctx.send_command("switch", command, vec![]).await
            }
            Characteristic::RotationSpeed => {
                let step = units::percent_to_fan_speed(int_arg(characteristic, value)?);
                self.ctx
                    .send_command("fanSpeed", "setFanSpeed", vec![json!(step)])
                    .await
            }
            Characteristic::SwingMode => {
                let mode = oscillation_mode(bool_arg(characteristic, value)?);
                self.ctx
                    .send_command("fanOscillationMode", "setFanOscillationMode", vec![json!(mode)])
                    .await
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    fn process_event(&self, event: &DeviceEvent) {
        let characteristic = match event.capability.as_str() {
            "switch" => Characteristic::Active,
            "fanSpeed" => Characteristic::RotationSpeed,
            "fanOscillationMode" => Characteristic::SwingMode,
            _ => return,
        };
        let status = self.ctx.event_status(event);
        if let Some(value) = read(&status, characteristic) {
            self.ctx.project(characteristic, value);
        }
    }
}
