use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::float_arg;
use super::int_arg;
use super::units;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::hub::display_units;
use crate::hub::heating_cooling;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

const HEATING: (&str, &str, &str) = (
    "thermostatHeatingSetpoint",
    "heatingSetpoint",
    "setHeatingSetpoint",
);
const COOLING: (&str, &str, &str) = (
    "thermostatCoolingSetpoint",
    "coolingSetpoint",
    "setCoolingSetpoint",
);

/// Reported temperature in Celsius.
pub(crate) fn current_temperature(status: &ComponentStatus) -> Result<f64, StatusError> {
    let value = status.number("temperatureMeasurement", "temperature")?;
    Ok(units::to_celsius(
        value,
        status.unit("temperatureMeasurement", "temperature"),
    ))
}

pub(crate) fn temperature_unit(status: &ComponentStatus) -> Option<&str> {
    status.unit("temperatureMeasurement", "temperature")
}

/// Thermostat over one of the four thermostat capability shapes.
pub struct ThermostatService {
    ctx: ServiceContext,
}

impl ThermostatService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn characteristics(&self) -> Vec<Characteristic> {
        let mut characteristics = vec![
            Characteristic::CurrentTemperature,
            Characteristic::TargetTemperature,
            Characteristic::TemperatureDisplayUnits,
            Characteristic::CurrentHeatingCoolingState,
            Characteristic::TargetHeatingCoolingState,
        ];
        if self.ctx.claims(HEATING.0) {
            characteristics.push(Characteristic::HeatingThresholdTemperature);
        }
        if self.ctx.claims(COOLING.0) {
            characteristics.push(Characteristic::CoolingThresholdTemperature);
        }
        if self.ctx.claims("relativeHumidityMeasurement") {
            characteristics.push(Characteristic::CurrentRelativeHumidity);
        }
        characteristics
    }

    fn target_mode(&self, status: &ComponentStatus) -> Result<i64, StatusError> {
        if !self.ctx.claims("thermostatMode") {
            // Heat-only shape.
            return Ok(heating_cooling::HEAT);
        }
        let mode = match status.text("thermostatMode", "thermostatMode")? {
            "off" => heating_cooling::OFF,
            "heat" | "emergency heat" => heating_cooling::HEAT,
            "cool" => heating_cooling::COOL,
            _ => heating_cooling::AUTO,
        };
        Ok(mode)
    }

    fn current_mode(&self, status: &ComponentStatus) -> Result<i64, StatusError> {
        if self.ctx.claims("thermostatOperatingState") {
            let state = match status.text("thermostatOperatingState", "thermostatOperatingState")? {
                "heating" | "pending heat" => heating_cooling::HEAT,
                "cooling" | "pending cool" => heating_cooling::COOL,
                _ => heating_cooling::OFF,
            };
            return Ok(state);
        }
        Ok(match self.target_mode(status)? {
            heating_cooling::HEAT => heating_cooling::HEAT,
            heating_cooling::COOL => heating_cooling::COOL,
            _ => heating_cooling::OFF,
        })
    }

    /// Setpoint backing TargetTemperature in the current mode.
    fn target_setpoint(
        &self,
        status: &ComponentStatus,
    ) -> Result<(&'static str, &'static str, &'static str), StatusError> {
        let heat = self.ctx.claims(HEATING.0);
        let cool = self.ctx.claims(COOLING.0);
        let setpoint = match self.target_mode(status)? {
            heating_cooling::COOL if cool => COOLING,
            _ if heat => HEATING,
            _ => COOLING,
        };
        Ok(setpoint)
    }

    fn setpoint(
        &self,
        status: &ComponentStatus,
        (capability, attribute, _): (&str, &str, &str),
    ) -> Result<f64, StatusError> {
        let value = status.number(capability, attribute)?;
        let unit = status
            .unit(capability, attribute)
            .or(temperature_unit(status));
        Ok(units::to_celsius(value, unit))
    }

    fn read(
        &self,
        status: &ComponentStatus,
        characteristic: Characteristic,
    ) -> Option<Result<CharValue, StatusError>> {
        let value = match characteristic {
            Characteristic::CurrentTemperature => current_temperature(status).map(CharValue::Float),
            Characteristic::TargetTemperature => self
                .target_setpoint(status)
                .and_then(|setpoint| self.setpoint(status, setpoint))
                .map(CharValue::Float),
            Characteristic::TemperatureDisplayUnits => {
                if units::is_fahrenheit(temperature_unit(status)) {
                    Ok(CharValue::Int(display_units::FAHRENHEIT))
                } else {
                    Ok(CharValue::Int(display_units::CELSIUS))
                }
            }
            Characteristic::CurrentHeatingCoolingState => self.current_mode(status).map(CharValue::Int),
            Characteristic::TargetHeatingCoolingState => self.target_mode(status).map(CharValue::Int),
            Characteristic::HeatingThresholdTemperature => {
                self.setpoint(status, HEATING).map(CharValue::Float)
            }
            Characteristic::CoolingThresholdTemperature => {
                self.setpoint(status, COOLING).map(CharValue::Float)
            }
            Characteristic::CurrentRelativeHumidity => status
                .number("relativeHumidityMeasurement", "humidity")
                .map(CharValue::Float),
            _ => return None,
        };
        Some(value)
    }

    async fn write_setpoint(
        &self,
        status: &ComponentStatus,
        (capability, attribute, command): (&str, &str, &str),
        celsius: f64,
    ) -> Result<(), HubError> {
        let unit = status
            .unit(capability, attribute)
            .or(temperature_unit(status));
        let value = units::from_celsius(celsius, unit);
        self.ctx
            .send_command(capability, command, vec![json!(value)])
            .await
    }
}

#[async_trait]
impl Service for ThermostatService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Thermostat
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(ServiceType::Thermostat, self.characteristics())]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![
            self.ctx.poll(Characteristic::CurrentTemperature, PollGroup::Sensors),
            self.ctx.poll_with_target(
                Characteristic::CurrentHeatingCoolingState,
                Characteristic::TargetHeatingCoolingState,
                PollGroup::SwitchesAndLights,
            ),
            self.ctx.poll(Characteristic::TargetTemperature, PollGroup::SwitchesAndLights),
        ]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        if !self.characteristics().contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let status = self.ctx.status().await?;
        match self.read(&status, characteristic) {
            Some(value) => self.ctx.translate(value),
            None => Err(HubError::UnsupportedCharacteristic(characteristic)),
        }
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if !self.characteristics().contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        match characteristic {
            Characteristic::TargetHeatingCoolingState => {
                if !self.ctx.claims("thermostatMode") {
                    return Err(HubError::UnsupportedCharacteristic(characteristic));
                }
                let mode = match int_arg(characteristic, value)? {
                    heating_cooling::OFF => "off",
                    heating_cooling::HEAT => "heat",
                    heating_cooling::COOL => "cool",
                    heating_cooling::AUTO => "auto",
                    _ => {
                        return Err(HubError::InvalidValue {
                            characteristic,
                            value,
                        });
                    }
                };
                self.ctx
                    .send_command("thermostatMode", "setThermostatMode", vec![json!(mode)])
                    .await
            }
            Characteristic::TargetTemperature => {
                let celsius = float_arg(characteristic, value)?;
                let status = self.ctx.status().await?;
                let setpoint = self.ctx.translate(self.target_setpoint(&status))?;
                self.write_setpoint(&status, setpoint, celsius).await
            }
            Characteristic::HeatingThresholdTemperature => {
                let celsius = float_arg(characteristic, value)?;
                let status = self.ctx.status().await?;
                self.write_setpoint(&status, HEATING, celsius).await
            }
            Characteristic::CoolingThresholdTemperature => {
                let celsius = float_arg(characteristic, value)?;
                let status = self.ctx.status().await?;
                self.write_setpoint(&status, COOLING, celsius).await
            }
            Characteristic::TemperatureDisplayUnits => {
                // Display only; the device keeps its own unit.
                debug!("[{}] Display units set to {}", self.ctx.name(), value);
                Ok(())
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    fn process_event(&self, event: &DeviceEvent) {
        let affected: &[Characteristic] = match event.capability.as_str() {
            "temperatureMeasurement" => &[
                Characteristic::CurrentTemperature,
                Characteristic::TemperatureDisplayUnits,
            ],
            "thermostatMode" => &[
                Characteristic::TargetHeatingCoolingState,
                Characteristic::CurrentHeatingCoolingState,
                Characteristic::TargetTemperature,
            ],
            "thermostatHeatingSetpoint" => &[
                Characteristic::HeatingThresholdTemperature,
                Characteristic::TargetTemperature,
            ],
            "thermostatCoolingSetpoint" => &[
                Characteristic::CoolingThresholdTemperature,
                Characteristic::TargetTemperature,
            ],
            "thermostatOperatingState" => &[Characteristic::CurrentHeatingCoolingState],
            "relativeHumidityMeasurement" => &[Characteristic::CurrentRelativeHumidity],
            _ => &[],
        };
        let exposed = self.characteristics();
        let status = self.ctx.event_status(event);
        for characteristic in affected.iter().filter(|c| exposed.contains(c)) {
            if let Some(value) = self.read(&status, *characteristic) {
                self.ctx.project(*characteristic, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::services::testing::Harness;
    use crate::services::testing::event;
    use crate::services::testing::sent;

    const FULL: &[&str] = &[
        "temperatureMeasurement",
        "thermostatMode",
        "thermostatHeatingSetpoint",
        "thermostatCoolingSetpoint",
        "thermostatOperatingState",
    ];

    fn fahrenheit_thermostat(mode: &str) -> Harness {
        Harness::new(json!({
            "components": { "main": {
                "temperatureMeasurement": { "temperature": { "value": 68, "unit": "F" } },
                "thermostatMode": { "thermostatMode": { "value": mode } },
                "thermostatHeatingSetpoint": { "heatingSetpoint": { "value": 65, "unit": "F" } },
                "thermostatCoolingSetpoint": { "coolingSetpoint": { "value": 77, "unit": "F" } },
                "thermostatOperatingState": { "thermostatOperatingState": { "value": "cooling" } }
            } }
        }))
    }

    #[tokio::test]
    async fn test_fahrenheit_values_are_reported_in_celsius() {
        let harness = fahrenheit_thermostat("cool");
        let thermostat = harness.build(ServiceKind::Thermostat, FULL);

        assert_eq!(
            thermostat.get(Characteristic::CurrentTemperature).await,
            Ok(CharValue::Float(20.0))
        );
        assert_eq!(
            thermostat.get(Characteristic::TargetTemperature).await,
            Ok(CharValue::Float(25.0))
        );
        assert_eq!(
            thermostat.get(Characteristic::TemperatureDisplayUnits).await,
            Ok(CharValue::Int(display_units::FAHRENHEIT))
        );
        assert_eq!(
            thermostat.get(Characteristic::CurrentHeatingCoolingState).await,
            Ok(CharValue::Int(heating_cooling::COOL))
        );
    }

    #[tokio::test]
    async fn test_target_temperature_follows_mode() {
        let harness = fahrenheit_thermostat("heat");
        let thermostat = harness.build(ServiceKind::Thermostat, FULL);

        thermostat
            .set(Characteristic::TargetTemperature, CharValue::Float(20.0))
            .await
            .unwrap();
        assert_eq!(
            harness.api.sent(),
            vec![sent("thermostatHeatingSetpoint", "setHeatingSetpoint", vec![json!(68.0)])]
        );
    }

    #[tokio::test]
    async fn test_heat_only_shape() {
        let harness = Harness::new(json!({
            "components": { "main": {
                "temperatureMeasurement": { "temperature": { "value": 19.5, "unit": "C" } },
                "thermostatHeatingSetpoint": { "heatingSetpoint": { "value": 21, "unit": "C" } }
            } }
        }));
        let thermostat = harness.build(
            ServiceKind::Thermostat,
            &["temperatureMeasurement", "thermostatHeatingSetpoint"],
        );

        assert_eq!(
            thermostat.get(Characteristic::TargetHeatingCoolingState).await,
            Ok(CharValue::Int(heating_cooling::HEAT))
        );
        assert_eq!(
            thermostat.get(Characteristic::TargetTemperature).await,
            Ok(CharValue::Float(21.0))
        );
        assert_eq!(
            thermostat
                .set(Characteristic::TargetHeatingCoolingState, CharValue::Int(heating_cooling::COOL))
                .await,
            Err(HubError::UnsupportedCharacteristic(
                Characteristic::TargetHeatingCoolingState
            ))
        );
        assert_eq!(
            thermostat.get(Characteristic::CoolingThresholdTemperature).await,
            Err(HubError::UnsupportedCharacteristic(
                Characteristic::CoolingThresholdTemperature
            ))
        );
    }

    #[tokio::test]
    async fn test_mode_commands() {
        let harness = fahrenheit_thermostat("off");
        let thermostat = harness.build(ServiceKind::Thermostat, FULL);

        thermostat
            .set(Characteristic::TargetHeatingCoolingState, CharValue::Int(heating_cooling::AUTO))
            .await
            .unwrap();
        assert!(matches!(
            thermostat
                .set(Characteristic::TargetHeatingCoolingState, CharValue::Int(7))
                .await,
            Err(HubError::InvalidValue { .. })
        ));
        assert_eq!(
            harness.api.sent(),
            vec![sent("thermostatMode", "setThermostatMode", vec![json!("auto")])]
        );
    }

    #[tokio::test]
    async fn test_mode_event_updates_target_state() {
        let harness = fahrenheit_thermostat("off");
        let thermostat = harness.build(ServiceKind::Thermostat, FULL);

        thermostat.process_event(&event("thermostatMode", "thermostatMode", json!("heat")));
        assert_eq!(
            harness.value(Characteristic::TargetHeatingCoolingState),
            Some(CharValue::Int(heating_cooling::HEAT))
        );
        assert_eq!(harness.api.status_calls(), 0);
    }
}
