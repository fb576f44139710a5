use async_trait::async_trait;
use serde_json::json;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::bool_arg;
use super::float_arg;
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

/// Lightbulb over `switch` plus any of `switchLevel`, `colorControl`,
/// `colorTemperature`.
pub struct LightService {
    ctx: ServiceContext,
}

impl LightService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn characteristics(&self) -> Vec<Characteristic> {
        let mut characteristics = vec![Characteristic::On];
        if self.ctx.claims("switchLevel") {
            characteristics.push(Characteristic::Brightness);
        }
        if self.ctx.claims("colorControl") {
            characteristics.push(Characteristic::Hue);
            characteristics.push(Characteristic::Saturation);
        }
        if self.ctx.claims("colorTemperature") {
            characteristics.push(Characteristic::ColorTemperature);
        }
        characteristics
    }
}

fn read(status: &ComponentStatus, characteristic: Characteristic) -> Option<Result<CharValue, StatusError>> {
    let value = match characteristic {
        Characteristic::On => switch_on(status).map(CharValue::Bool),
        Characteristic::Brightness => status
            .number("switchLevel", "level")
            .map(|level| CharValue::Int(level.round() as i64)),
        Characteristic::Hue => status
            .number("colorControl", "hue")
            .map(|hue| CharValue::Float(units::hue_to_degrees(hue))),
        Characteristic::Saturation => status
            .number("colorControl", "saturation")
            .map(|saturation| CharValue::Float(saturation.clamp(0.0, 100.0))),
        Characteristic::ColorTemperature => status
            .number("colorTemperature", "colorTemperature")
            .map(|kelvin| CharValue::Int(units::kelvin_to_mired(kelvin))),
        _ => return None,
    };
    Some(value)
}

#[async_trait]
impl Service for LightService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Light
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(ServiceType::Lightbulb, self.characteristics())]
    }

    fn polls(&self) -> Vec<PollSpec> {
        let mut polls = vec![self.ctx.poll(Characteristic::On, PollGroup::SwitchesAndLights)];
        if self.ctx.claims("switchLevel") {
            polls.push(self.ctx.poll(Characteristic::Brightness, PollGroup::SwitchesAndLights));
        }
        polls
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
            Characteristic::On => {
                let command = if bool_arg(characteristic, value)? { "on" } else { "off" };
                self.ctx.send_command("switch", command, vec![]).await
            }
            Characteristic::Brightness => {
                let level = int_arg(characteristic, value)?.clamp(0, 100);
                self.ctx
                    .send_command("switchLevel", "setLevel", vec![json!(level)])
                    .await
            }
            Characteristic::Hue => {
                let hue = units::degrees_to_hue(float_arg(characteristic, value)?);
                self.ctx
                    .send_command("colorControl", "setHue", vec![json!(hue)])
                    .await
            }
            Characteristic::Saturation => {
                let saturation = float_arg(characteristic, value)?.round().clamp(0.0, 100.0) as i64;
                self.ctx
                    .send_command("colorControl", "setSaturation", vec![json!(saturation)])
                    .await
            }
            Characteristic::ColorTemperature => {
                let kelvin = units::mired_to_kelvin(int_arg(characteristic, value)?);
                self.ctx
                    .send_command("colorTemperature", "setColorTemperature", vec![json!(kelvin)])
                    .await
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    fn process_event(&self, event: &DeviceEvent) {
        let status = self.ctx.event_status(event);
        let affected: &[Characteristic] = match event.capability.as_str() {
            "switch" => &[Characteristic::On],
            "switchLevel" => &[Characteristic::Brightness],
            "colorControl" => &[Characteristic::Hue, Characteristic::Saturation],
            "colorTemperature" => &[Characteristic::ColorTemperature],
            _ => &[],
        };
        for characteristic in affected {
            if let Some(value) = read(&status, *characteristic) {
                self.ctx.project(*characteristic, value);
            }
        }
    }
}
