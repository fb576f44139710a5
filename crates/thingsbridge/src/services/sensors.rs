//! Read-only sensors.
//!
//! Each sensor is one capability translated into one or two characteristics.
//! Unlike the controllable services, a sensor that cannot translate its status
//! retires itself: polling stops and the hub service is removed until the
//! bridge restarts.

use async_trait::async_trait;
use serde_json::Value;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::flag;
use super::thermostat::current_temperature;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::hub::contact_state;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;
use crate::smartthings::model::malformed;

const LOW_BATTERY_PERCENT: f64 = 20.0;
const MIN_LUX: f64 = 0.0001;

type Reader = fn(&ComponentStatus) -> Result<CharValue, StatusError>;

pub struct SensorSpec {
    pub kind: ServiceKind,
    pub service_type: ServiceType,
    pub capability: &'static str,
    pub readings: &'static [(Characteristic, Reader)],
}

pub static TEMPERATURE: SensorSpec = SensorSpec {
    kind: ServiceKind::TemperatureSensor,
    service_type: ServiceType::TemperatureSensor,
    capability: "temperatureMeasurement",
    readings: &[(Characteristic::CurrentTemperature, temperature)],
};

pub static HUMIDITY: SensorSpec = SensorSpec {
    kind: ServiceKind::HumiditySensor,
    service_type: ServiceType::HumiditySensor,
    capability: "relativeHumidityMeasurement",
    readings: &[(Characteristic::CurrentRelativeHumidity, humidity)],
};

pub static LIGHT: SensorSpec = SensorSpec {
    kind: ServiceKind::LightSensor,
    service_type: ServiceType::LightSensor,
    capability: "illuminanceMeasurement",
    readings: &[(Characteristic::CurrentAmbientLightLevel, illuminance)],
};

pub static MOTION: SensorSpec = SensorSpec {
    kind: ServiceKind::MotionSensor,
    service_type: ServiceType::MotionSensor,
    capability: "motionSensor",
    readings: &[(Characteristic::MotionDetected, motion)],
};

pub static CONTACT: SensorSpec = SensorSpec {
    kind: ServiceKind::ContactSensor,
    service_type: ServiceType::ContactSensor,
    capability: "contactSensor",
    readings: &[(Characteristic::ContactSensorState, contact)],
};

pub static LEAK: SensorSpec = SensorSpec {
    kind: ServiceKind::LeakSensor,
    service_type: ServiceType::LeakSensor,
    capability: "waterSensor",
    readings: &[(Characteristic::LeakDetected, leak)],
};

pub static SMOKE: SensorSpec = SensorSpec {
    kind: ServiceKind::SmokeSensor,
    service_type: ServiceType::SmokeSensor,
    capability: "smokeDetector",
    readings: &[(Characteristic::SmokeDetected, smoke)],
};

pub static CARBON_MONOXIDE: SensorSpec = SensorSpec {
    kind: ServiceKind::CarbonMonoxideSensor,
    service_type: ServiceType::CarbonMonoxideSensor,
    capability: "carbonMonoxideDetector",
    readings: &[(Characteristic::CarbonMonoxideDetected, carbon_monoxide)],
};

pub static OCCUPANCY: SensorSpec = SensorSpec {
    kind: ServiceKind::OccupancySensor,
    service_type: ServiceType::OccupancySensor,
    capability: "presenceSensor",
    readings: &[(Characteristic::OccupancyDetected, presence)],
};

pub static BATTERY: SensorSpec = SensorSpec {
    kind: ServiceKind::Battery,
    service_type: ServiceType::Battery,
    capability: "battery",
    readings: &[
        (Characteristic::BatteryLevel, battery_level),
        (Characteristic::StatusLowBattery, low_battery),
    ],
};

fn temperature(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    current_temperature(status).map(CharValue::Float)
}

fn humidity(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let value = status.number("relativeHumidityMeasurement", "humidity")?;
    Ok(CharValue::Float(value.clamp(0.0, 100.0)))
}

fn illuminance(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let value = status.number("illuminanceMeasurement", "illuminance")?;
    Ok(CharValue::Float(value.max(MIN_LUX)))
}

fn motion(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    flag(status, "motionSensor", "motion", "active", "inactive").map(CharValue::Bool)
}

fn contact(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let closed = flag(status, "contactSensor", "contact", "closed", "open")?;
    Ok(CharValue::Int(if closed {
        contact_state::DETECTED
    } else {
        contact_state::NOT_DETECTED
    }))
}

fn leak(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let wet = flag(status, "waterSensor", "water", "wet", "dry")?;
    Ok(CharValue::Int(i64::from(wet)))
}

/// Detector states. A self-test reports as detected.
fn detected(status: &ComponentStatus, capability: &str, attribute: &str) -> Result<CharValue, StatusError> {
    match status.text(capability, attribute)? {
        "clear" => Ok(CharValue::Int(0)),
        "detected" | "tested" => Ok(CharValue::Int(1)),
        other => Err(malformed(
            capability,
            attribute,
            "clear, detected or tested",
            &Value::String(other.to_string()),
        )),
    }
}

fn smoke(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    detected(status, "smokeDetector", "smoke")
}

fn carbon_monoxide(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    detected(status, "carbonMonoxideDetector", "carbonMonoxide")
}

fn presence(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let present = flag(status, "presenceSensor", "presence", "present", "not present")?;
    Ok(CharValue::Int(i64::from(present)))
}

fn battery_level(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let level = status.number("battery", "battery")?;
    Ok(CharValue::Int(level.round().clamp(0.0, 100.0) as i64))
}

fn low_battery(status: &ComponentStatus) -> Result<CharValue, StatusError> {
    let level = status.number("battery", "battery")?;
    Ok(CharValue::Int(i64::from(level < LOW_BATTERY_PERCENT)))
}

pub struct SensorService {
    ctx: ServiceContext,
    spec: &'static SensorSpec,
}

impl SensorService {
    pub fn new(spec: &'static SensorSpec, ctx: ServiceContext) -> Self {
        Self { ctx, spec }
    }

    fn reader(&self, characteristic: Characteristic) -> Option<Reader> {
        self.spec
            .readings
            .iter()
            .find(|(c, _)| *c == characteristic)
            .map(|(_, read)| *read)
    }
}

#[async_trait]
impl Service for SensorService {
    fn kind(&self) -> ServiceKind {
        self.spec.kind
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        let characteristics = self.spec.readings.iter().map(|(c, _)| *c).collect();
        vec![self.ctx.exposure(self.spec.service_type, characteristics)]
    }

    fn polls(&self) -> Vec<PollSpec> {
        self.spec
            .readings
            .iter()
            .map(|(c, _)| self.ctx.poll(*c, PollGroup::Sensors))
            .collect()
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        let read = self
            .reader(characteristic)
            .ok_or(HubError::UnsupportedCharacteristic(characteristic))?;
        if self.ctx.is_retired() {
            return Err(HubError::CommunicationFailure);
        }
        let status = self.ctx.status().await?;
        read(&status).map_err(|e| {
            self.ctx.retire(&e);
            HubError::CommunicationFailure
        })
    }

    fn process_event(&self, event: &DeviceEvent) {
        if event.capability != self.spec.capability || self.ctx.is_retired() {
            return;
        }
        let status = self.ctx.event_status(event);
        for (characteristic, read) in self.spec.readings {
            match read(&status) {
                Ok(value) => self.ctx.update(*characteristic, value),
                Err(e) => {
                    self.ctx.retire(&e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::services::testing::Harness;
    use crate::services::testing::event;

    #[tokio::test]
    async fn test_fahrenheit_temperature_reports_celsius() {
        let harness = Harness::new(json!({ "components": { "main": { "temperatureMeasurement": {
            "temperature": { "value": 68, "unit": "F" }
        } } } }));
        let sensor = harness.build(ServiceKind::TemperatureSensor, &["temperatureMeasurement"]);

        assert_eq!(
            sensor.get(Characteristic::CurrentTemperature).await,
            Ok(CharValue::Float(20.0))
        );
    }

    #[tokio::test]
    async fn test_contact_and_battery_translation() {
        let harness = Harness::new(json!({ "components": { "main": {
            "contactSensor": { "contact": { "value": "open" } },
            "battery": { "battery": { "value": 15, "unit": "%" } }
        } } }));
        let contact = harness.build(ServiceKind::ContactSensor, &["contactSensor"]);
        assert_eq!(
            contact.get(Characteristic::ContactSensorState).await,
            Ok(CharValue::Int(contact_state::NOT_DETECTED))
        );

        let battery = harness.build(ServiceKind::Battery, &["battery"]);
        assert_eq!(battery.get(Characteristic::BatteryLevel).await, Ok(CharValue::Int(15)));
        assert_eq!(battery.get(Characteristic::StatusLowBattery).await, Ok(CharValue::Int(1)));
    }

    #[tokio::test]
    async fn test_detector_self_test_counts_as_detected() {
        let harness = Harness::new(json!({ "components": { "main": {
            "smokeDetector": { "smoke": { "value": "tested" } }
        } } }));
        let smoke = harness.build(ServiceKind::SmokeSensor, &["smokeDetector"]);
        assert_eq!(smoke.get(Characteristic::SmokeDetected).await, Ok(CharValue::Int(1)));
    }

    #[tokio::test]
    async fn test_events_for_other_capabilities_are_ignored() {
        let harness = Harness::new(json!({ "components": { "main": {
            "motionSensor": { "motion": { "value": "inactive" } }
        } } }));
        let motion = harness.build(ServiceKind::MotionSensor, &["motionSensor"]);

        motion.process_event(&event("switch", "switch", json!("on")));
        assert_eq!(harness.value(Characteristic::MotionDetected), None);
        motion.process_event(&event("motionSensor", "motion", json!("active")));
        assert_eq!(harness.value(Characteristic::MotionDetected), Some(CharValue::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reading_retires_sensor() {
        let harness = Harness::new(json!({ "components": { "main": {
            "relativeHumidityMeasurement": { "humidity": { "value": null } }
        } } }));
        let sensor = harness.build(ServiceKind::HumiditySensor, &["relativeHumidityMeasurement"]);
        for poll in sensor.polls() {
            harness
                .poller
                .start_polling_state(&sensor, poll, Duration::from_secs(5));
        }
        assert_eq!(harness.poller.active(), 1);

        assert_eq!(
            sensor.get(Characteristic::CurrentRelativeHumidity).await,
            Err(HubError::CommunicationFailure)
        );
        assert!(sensor.is_retired());
        assert!(harness.hub.service(&harness.key()).is_none());
        assert_eq!(harness.poller.active(), 0);

        // No further cloud traffic once retired.
        let calls = harness.api.status_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.api.status_calls(), calls);
        assert_eq!(
            sensor.get(Characteristic::CurrentRelativeHumidity).await,
            Err(HubError::CommunicationFailure)
        );
    }

    #[tokio::test]
    async fn test_malformed_event_retires_sensor() {
        let harness = Harness::new(json!({ "components": { "main": {
            "waterSensor": { "water": { "value": "dry" } }
        } } }));
        let leak = harness.build(ServiceKind::LeakSensor, &["waterSensor"]);

        leak.process_event(&event("waterSensor", "water", json!("flooded")));
        assert!(leak.is_retired());
        assert!(harness.hub.service(&harness.key()).is_none());
    }
}
