use async_trait::async_trait;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::bool_arg;
use super::switch_on;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::smartthings::DeviceEvent;

/// Plain on/off switch (`switch`).
pub struct SwitchService {
    ctx: ServiceContext,
}

impl SwitchService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Service for SwitchService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Switch
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(ServiceType::Switch, vec![Characteristic::On])]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![self.ctx.poll(Characteristic::On, PollGroup::SwitchesAndLights)]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        match characteristic {
            Characteristic::On => {
                let status = self.ctx.status().await?;
                self.ctx.translate(switch_on(&status)).map(CharValue::Bool)
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        match characteristic {
            Characteristic::On => {
                let command = if bool_arg(characteristic, value)? { "on" } else { "off" };
                self.ctx.send_command("switch", command, vec![]).await
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    fn process_event(&self, event: &DeviceEvent) {
        let status = self.ctx.event_status(event);
        self.ctx
            .project(Characteristic::On, switch_on(&status).map(CharValue::Bool));
    }
}
