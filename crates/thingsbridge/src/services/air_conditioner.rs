use async_trait::async_trait;
use serde_json::json;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::bool_arg;
use super::fan::oscillation_mode;
use super::fan::swinging;
use super::float_arg;
use super::int_arg;
use super::switch_on;
use super::thermostat::current_temperature;
use super::thermostat::temperature_unit;
use super::units;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceKey;
use crate::hub::ServiceType;
use crate::hub::heater_cooler;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;
use crate::smartthings::model::malformed;

/// Named fan modes in ascending speed; each covers a 20% band.
const FAN_MODES: &[&str] = &["auto", "low", "medium", "high", "turbo"];

const OPTIONAL_MODE: &str = "custom.airConditionerOptionalMode";

fn fan_mode_to_percent(status: &ComponentStatus) -> Result<i64, StatusError> {
    let mode = status.text("airConditionerFanMode", "fanMode")?;
    FAN_MODES
        .iter()
        .position(|m| *m == mode)
        .map(|index| (index as i64 + 1) * 20)
        .ok_or_else(|| {
            malformed(
                "airConditionerFanMode",
                "fanMode",
                "a known fan mode",
                &json!(mode),
            )
        })
}

fn percent_to_fan_mode(percent: i64) -> &'static str {
    let band = ((percent.clamp(0, 100) + 19) / 20 - 1).max(0) as usize;
    FAN_MODES[band.min(FAN_MODES.len() - 1)]
}

fn ac_mode(status: &ComponentStatus) -> Result<&str, StatusError> {
    status.text("airConditionerMode", "airConditionerMode")
}

fn setpoint(status: &ComponentStatus) -> Result<f64, StatusError> {
    let value = status.number("thermostatCoolingSetpoint", "coolingSetpoint")?;
    let unit = status
        .unit("thermostatCoolingSetpoint", "coolingSetpoint")
        .or(temperature_unit(status));
    Ok(units::to_celsius(value, unit))
}

/// HeaterCooler over the air-conditioner capability set, plus an optional
/// humidity sensor and optional-mode switch.
pub struct AirConditionerService {
    ctx: ServiceContext,
    humidity_key: Option<ServiceKey>,
    optional_mode: Option<(ServiceKey, &'static str)>,
}

impl AirConditionerService {
    pub fn new(ctx: ServiceContext) -> Self {
        let humidity_key = (ctx.options().expose_ac_humidity
            && ctx.claims("relativeHumidityMeasurement"))
        .then(|| ctx.sub_key("humidity"));
        let optional_mode = ctx
            .options()
            .ac_optional_mode
            .filter(|_| ctx.claims(OPTIONAL_MODE))
            .map(|mode| (ctx.sub_key("optionalMode"), mode.device_value()));
        Self {
            ctx,
            humidity_key,
            optional_mode,
        }
    }

    fn cooler_characteristics(&self) -> Vec<Characteristic> {
        let mut characteristics = vec![
            Characteristic::Active,
            Characteristic::CurrentHeaterCoolerState,
            Characteristic::TargetHeaterCoolerState,
            Characteristic::CurrentTemperature,
            Characteristic::CoolingThresholdTemperature,
            Characteristic::HeatingThresholdTemperature,
            Characteristic::RotationSpeed,
        ];
        if self.ctx.claims("fanOscillationMode") {
            characteristics.push(Characteristic::SwingMode);
        }
        characteristics
    }

    /// Hub service carrying a characteristic, if this binding exposes it.
    fn key_for(&self, characteristic: Characteristic) -> Option<&ServiceKey> {
        match characteristic {
            Characteristic::CurrentRelativeHumidity => self.humidity_key.as_ref(),
            Characteristic::On => self.optional_mode.as_ref().map(|(key, _)| key),
            c if self.cooler_characteristics().contains(&c) => Some(self.ctx.key()),
            _ => None,
        }
    }

    fn read(&self, status: &ComponentStatus, characteristic: Characteristic) -> Option<Result<CharValue, StatusError>> {
        let value = match characteristic {
            Characteristic::Active => switch_on(status).map(|on| CharValue::Int(i64::from(on))),
            Characteristic::CurrentHeaterCoolerState => current_state(status).map(CharValue::Int),
            Characteristic::TargetHeaterCoolerState => target_state(status).map(CharValue::Int),
            Characteristic::CurrentTemperature => current_temperature(status).map(CharValue::Float),
            Characteristic::CoolingThresholdTemperature
            | Characteristic::HeatingThresholdTemperature => setpoint(status).map(CharValue::Float),
            Characteristic::RotationSpeed => fan_mode_to_percent(status).map(CharValue::Int),
            Characteristic::SwingMode => swinging(status).map(|swing| CharValue::Int(i64::from(swing))),
            Characteristic::CurrentRelativeHumidity => status
                .number("relativeHumidityMeasurement", "humidity")
                .map(CharValue::Float),
            Characteristic::On => {
                let (_, mode) = self.optional_mode.as_ref()?;
                status
                    .text(OPTIONAL_MODE, "acOptionalMode")
                    .map(|current| CharValue::Bool(current == *mode))
            }
            _ => return None,
        };
        Some(value)
    }
}

fn current_state(status: &ComponentStatus) -> Result<i64, StatusError> {
    if !switch_on(status)? {
        return Ok(heater_cooler::INACTIVE);
    }
    Ok(match ac_mode(status)? {
        "cool" | "dry" => heater_cooler::COOLING,
        "heat" => heater_cooler::HEATING,
        _ => heater_cooler::IDLE,
    })
}

fn target_state(status: &ComponentStatus) -> Result<i64, StatusError> {
    Ok(match ac_mode(status)? {
        "cool" | "dry" => heater_cooler::TARGET_COOL,
        "heat" => heater_cooler::TARGET_HEAT,
        _ => heater_cooler::TARGET_AUTO,
    })
}

#[async_trait]
impl Service for AirConditionerService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::AirConditioner
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        let mut exposures = vec![
            self.ctx
                .exposure(ServiceType::HeaterCooler, self.cooler_characteristics()),
        ];
        if let Some(key) = &self.humidity_key {
            exposures.push(Exposure {
                key: key.clone(),
                service_type: ServiceType::HumiditySensor,
                name: format!("{} Humidity", self.ctx.name()),
                characteristics: vec![Characteristic::CurrentRelativeHumidity],
            });
        }
        if let Some((key, mode)) = &self.optional_mode {
            exposures.push(Exposure {
                key: key.clone(),
                service_type: ServiceType::Switch,
                name: format!("{} {}", self.ctx.name(), mode),
                characteristics: vec![Characteristic::On],
            });
        }
        exposures
    }

    fn polls(&self) -> Vec<PollSpec> {
        let mut polls = vec![
            self.ctx.poll(Characteristic::Active, PollGroup::SwitchesAndLights),
            self.ctx.poll_with_target(
                Characteristic::CurrentHeaterCoolerState,
                Characteristic::TargetHeaterCoolerState,
                PollGroup::SwitchesAndLights,
            ),
            self.ctx.poll(Characteristic::CurrentTemperature, PollGroup::Sensors),
        ];
        if let Some(key) = &self.humidity_key {
            polls.push(PollSpec {
                key: key.clone(),
                characteristic: Characteristic::CurrentRelativeHumidity,
                target: None,
                group: PollGroup::Sensors,
            });
        }
        if let Some((key, _)) = &self.optional_mode {
            polls.push(PollSpec {
                key: key.clone(),
                characteristic: Characteristic::On,
                target: None,
                group: PollGroup::SwitchesAndLights,
            });
        }
        polls
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        if self.key_for(characteristic).is_none() {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let status = self.ctx.status().await?;
        match self.read(&status, characteristic) {
            Some(value) => self.ctx.translate(value),
            None => Err(HubError::UnsupportedCharacteristic(characteristic)),
        }
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if self.key_for(characteristic).is_none() {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        match characteristic {
            Characteristic::Active => {
                let command = if bool_arg(characteristic, value)? { "on" } else { "off" };
                self.ctx.send_command("switch", command, vec![]).await
            }
            Characteristic::TargetHeaterCoolerState => {
                let mode = match int_arg(characteristic, value)? {
                    heater_cooler::TARGET_AUTO => "auto",
                    heater_cooler::TARGET_HEAT => "heat",
                    heater_cooler::TARGET_COOL => "cool",
                    _ => {
                        return Err(HubError::InvalidValue {
                            characteristic,
                            value,
                        });
                    }
                };
                self.ctx
                    .send_command("airConditionerMode", "setAirConditionerMode", vec![json!(mode)])
                    .await
            }
            Characteristic::CoolingThresholdTemperature
            | Characteristic::HeatingThresholdTemperature => {
                let celsius = float_arg(characteristic, value)?;
                let status = self.ctx.status().await?;
                let unit = status
                    .unit("thermostatCoolingSetpoint", "coolingSetpoint")
                    .or(temperature_unit(&status));
                let setpoint = units::from_celsius(celsius, unit);
                self.ctx
                    .send_command("thermostatCoolingSetpoint", "setCoolingSetpoint", vec![json!(setpoint)])
                    .await
            }
            Characteristic::RotationSpeed => {
                let mode = percent_to_fan_mode(int_arg(characteristic, value)?);
                self.ctx
                    .send_command("airConditionerFanMode", "setFanMode", vec![json!(mode)])
                    .await
            }
            Characteristic::SwingMode => {
                let mode = oscillation_mode(bool_arg(characteristic, value)?);
                self.ctx
                    .send_command("fanOscillationMode", "setFanOscillationMode", vec![json!(mode)])
                    .await
            }
            Characteristic::On => {
                let Some((_, mode)) = &self.optional_mode else {
                    return Err(HubError::UnsupportedCharacteristic(characteristic));
                };
                let target = if bool_arg(characteristic, value)? { *mode } else { "off" };
                self.ctx
                    .send_command(OPTIONAL_MODE, "setAcOptionalMode", vec![json!(target)])
                    .await
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    fn process_event(&self, event: &DeviceEvent) {
        let affected: &[Characteristic] = match event.capability.as_str() {
            "switch" => &[Characteristic::Active, Characteristic::CurrentHeaterCoolerState],
            "airConditionerMode" => &[
                Characteristic::CurrentHeaterCoolerState,
                Characteristic::TargetHeaterCoolerState,
            ],
            "temperatureMeasurement" => &[Characteristic::CurrentTemperature],
            "thermostatCoolingSetpoint" => &[
                Characteristic::CoolingThresholdTemperature,
                Characteristic::HeatingThresholdTemperature,
            ],
            "airConditionerFanMode" => &[Characteristic::RotationSpeed],
            "fanOscillationMode" => &[Characteristic::SwingMode],
            "relativeHumidityMeasurement" => &[Characteristic::CurrentRelativeHumidity],
            OPTIONAL_MODE => &[Characteristic::On],
            _ => &[],
        };
        let status = self.ctx.event_status(event);
        for characteristic in affected {
            let Some(key) = self.key_for(*characteristic) else {
                continue;
            };
            if let Some(value) = self.read(&status, *characteristic) {
                self.ctx.project_on(key, *characteristic, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::BridgeOptions;
    use crate::config::OptionalMode;
    use crate::services::testing::Harness;
    use crate::services::testing::event;
    use crate::services::testing::sent;

    const CAPS: &[&str] = &[
        "switch",
        "airConditionerMode",
        "airConditionerFanMode",
        "thermostatCoolingSetpoint",
        "temperatureMeasurement",
        "relativeHumidityMeasurement",
        "custom.airConditionerOptionalMode",
    ];

    fn aircon() -> Harness {
        Harness::new(json!({
            "components": { "main": {
                "switch": { "switch": { "value": "on" } },
                "airConditionerMode": { "airConditionerMode": { "value": "dry" } },
                "airConditionerFanMode": { "fanMode": { "value": "medium" } },
                "thermostatCoolingSetpoint": { "coolingSetpoint": { "value": 24, "unit": "C" } },
                "temperatureMeasurement": { "temperature": { "value": 27, "unit": "C" } },
                "relativeHumidityMeasurement": { "humidity": { "value": 55 } },
                "custom.airConditionerOptionalMode": { "acOptionalMode": { "value": "windFree" } }
            } }
        }))
    }

    fn full_options() -> BridgeOptions {
        BridgeOptions {
            expose_ac_humidity: true,
            ac_optional_mode: Some(OptionalMode::WindFree),
            ..BridgeOptions::default()
        }
    }

    #[test]
    fn test_fan_mode_bands() {
        assert_eq!(percent_to_fan_mode(0), "auto");
        assert_eq!(percent_to_fan_mode(20), "auto");
        assert_eq!(percent_to_fan_mode(21), "low");
        assert_eq!(percent_to_fan_mode(60), "medium");
        assert_eq!(percent_to_fan_mode(100), "turbo");
    }

    #[tokio::test]
    async fn test_dry_mode_reads_as_cooling() {
        let harness = aircon();
        let ac = harness.build(ServiceKind::AirConditioner, CAPS);

        assert_eq!(
            ac.get(Characteristic::CurrentHeaterCoolerState).await,
            Ok(CharValue::Int(heater_cooler::COOLING))
        );
        assert_eq!(
            ac.get(Characteristic::TargetHeaterCoolerState).await,
            Ok(CharValue::Int(heater_cooler::TARGET_COOL))
        );
        assert_eq!(ac.get(Characteristic::RotationSpeed).await, Ok(CharValue::Int(60)));
        assert_eq!(
            ac.get(Characteristic::CoolingThresholdTemperature).await,
            Ok(CharValue::Float(24.0))
        );
    }

    #[tokio::test]
    async fn test_extras_are_hidden_by_default() {
        let harness = aircon();
        let ac = harness.build(ServiceKind::AirConditioner, CAPS);

        assert_eq!(ac.exposures().len(), 1);
        assert_eq!(
            ac.get(Characteristic::CurrentRelativeHumidity).await,
            Err(HubError::UnsupportedCharacteristic(
                Characteristic::CurrentRelativeHumidity
            ))
        );
    }

    #[tokio::test]
    async fn test_humidity_sensor_and_optional_mode_switch() {
        let harness = aircon();
        let ac = harness.build_with(ServiceKind::AirConditioner, CAPS, full_options());

        let exposures = ac.exposures();
        assert_eq!(exposures.len(), 3);
        assert_eq!(exposures[1].key.subtype, "main.test.humidity");
        assert_eq!(exposures[2].service_type, ServiceType::Switch);

        assert_eq!(
            ac.get(Characteristic::CurrentRelativeHumidity).await,
            Ok(CharValue::Float(55.0))
        );
        assert_eq!(ac.get(Characteristic::On).await, Ok(CharValue::Bool(true)));

        ac.set(Characteristic::On, CharValue::Bool(false)).await.unwrap();
        assert_eq!(
            harness.api.sent(),
            vec![sent(OPTIONAL_MODE, "setAcOptionalMode", vec![json!("off")])]
        );
    }

    #[tokio::test]
    async fn test_event_routes_to_sub_service() {
        let harness = aircon();
        let ac = harness.build_with(ServiceKind::AirConditioner, CAPS, full_options());

        ac.process_event(&event("relativeHumidityMeasurement", "humidity", json!(61)));
        let humidity_key = ServiceKey::new("dev-1", "main.test.humidity");
        assert_eq!(
            harness.hub.value(&humidity_key, Characteristic::CurrentRelativeHumidity),
            Some(CharValue::Float(61.0))
        );
    }

    #[tokio::test]
    async fn test_fan_speed_command() {
        let harness = aircon();
        let ac = harness.build(ServiceKind::AirConditioner, CAPS);

        ac.set(Characteristic::RotationSpeed, CharValue::Int(90)).await.unwrap();
        ac.set(Characteristic::TargetHeaterCoolerState, CharValue::Int(heater_cooler::TARGET_HEAT))
            .await
            .unwrap();
        assert_eq!(
            harness.api.sent(),
            vec![
                sent("airConditionerFanMode", "setFanMode", vec![json!("turbo")]),
                sent("airConditionerMode", "setAirConditionerMode", vec![json!("heat")]),
            ]
        );
    }
}
