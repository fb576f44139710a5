use async_trait::async_trait;
use serde_json::json;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::bool_arg;
use super::flag;
use super::int_arg;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

fn read(status: &ComponentStatus, characteristic: Characteristic) -> Result<CharValue, StatusError> {
    match characteristic {
        Characteristic::Mute => flag(status, "audioMute", "mute", "muted", "unmuted").map(CharValue::Bool),
        _ => {
            let volume = status.number("audioVolume", "volume")?;
            Ok(CharValue::Int(volume.round().clamp(0.0, 100.0) as i64))
        }
    }
}

/// Speaker over `audioMute` and/or `audioVolume`.
pub struct SpeakerService {
    ctx: ServiceContext,
}

impl SpeakerService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn characteristics(&self) -> Vec<Characteristic> {
        let mut characteristics = Vec::new();
        if self.ctx.claims("audioMute") {
            characteristics.push(Characteristic::Mute);
        }
        if self.ctx.claims("audioVolume") {
            characteristics.push(Characteristic::Volume);
        }
        characteristics
    }
}

#[async_trait]
impl Service for SpeakerService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Speaker
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(ServiceType::Speaker, self.characteristics())]
    }

    fn polls(&self) -> Vec<PollSpec> {
        self.characteristics()
            .into_iter()
            .map(|c| self.ctx.poll(c, PollGroup::Speakers))
            .collect()
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        if !self.characteristics().contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let status = self.ctx.status().await?;
        self.ctx.translate(read(&status, characteristic))
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if !self.characteristics().contains(&characteristic) {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        match characteristic {
            Characteristic::Mute => {
                let command = if bool_arg(characteristic, value)? { "mute" } else { "unmute" };
                self.ctx.send_command("audioMute", command, vec![]).await
            }
            _ => {
                let volume = int_arg(characteristic, value)?.clamp(0, 100);
                self.ctx
                    .send_command("audioVolume", "setVolume", vec![json!(volume)])
                    .await
            }
        }
    }

    fn process_event(&self, event: &DeviceEvent) {
        let characteristic = match event.capability.as_str() {
            "audioMute" => Characteristic::Mute,
            "audioVolume" => Characteristic::Volume,
            _ => return,
        };
        let status = self.ctx.event_status(event);
        self.ctx.project(characteristic, read(&status, characteristic));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Harness;
    use crate::services::testing::event;
    use crate::services::testing::sent;

    fn status() -> serde_json::Value {
        json!({ "components": { "main": {
            "audioMute": { "mute": { "value": "unmuted" } },
            "audioVolume": { "volume": { "value": 35, "unit": "%" } }
        } } })
    }

    #[tokio::test]
    async fn test_reads_mute_and_volume() {
        let harness = Harness::new(status());
        let speaker = harness.build(ServiceKind::Speaker, &["audioVolume", "audioMute"]);

        assert_eq!(speaker.get(Characteristic::Mute).await, Ok(CharValue::Bool(false)));
        assert_eq!(speaker.get(Characteristic::Volume).await, Ok(CharValue::Int(35)));
    }

    #[tokio::test]
    async fn test_volume_only_speaker_has_no_mute() {
        let harness = Harness::new(status());
        let speaker = harness.build(ServiceKind::Speaker, &["audioVolume"]);

        assert_eq!(
            speaker.get(Characteristic::Mute).await,
            Err(HubError::UnsupportedCharacteristic(Characteristic::Mute))
        );
        speaker.set(Characteristic::Volume, CharValue::Int(120)).await.unwrap();
        assert_eq!(
            harness.api.sent(),
            vec![sent("audioVolume", "setVolume", vec![json!(100)])]
        );
    }

    #[tokio::test]
    async fn test_mute_event() {
        let harness = Harness::new(status());
        let speaker = harness.build(ServiceKind::Speaker, &["audioVolume", "audioMute"]);

        speaker.process_event(&event("audioMute", "mute", json!("muted")));
        assert_eq!(harness.value(Characteristic::Mute), Some(CharValue::Bool(true)));
        assert_eq!(harness.value(Characteristic::Volume), None);
    }
}
