use async_trait::async_trait;

use super::Exposure;
use super::PollSpec;
use super::Service;
use super::ServiceContext;
use super::ServiceKind;
use super::bool_arg;
use super::flag;
use crate::config::PollGroup;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::ServiceType;
use crate::smartthings::ComponentStatus;
use crate::smartthings::DeviceEvent;
use crate::smartthings::StatusError;

fn is_open(status: &ComponentStatus) -> Result<bool, StatusError> {
    flag(status, "valve", "valve", "open", "closed")
}

/// Valve over `valve`. Active and InUse both mirror the open state.
pub struct ValveService {
    ctx: ServiceContext,
}

impl ValveService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Service for ValveService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Valve
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    fn exposures(&self) -> Vec<Exposure> {
        vec![self.ctx.exposure(
            ServiceType::Valve,
            vec![Characteristic::Active, Characteristic::InUse],
        )]
    }

    fn polls(&self) -> Vec<PollSpec> {
        vec![
            self.ctx.poll(Characteristic::Active, PollGroup::SwitchesAndLights),
            self.ctx.poll(Characteristic::InUse, PollGroup::SwitchesAndLights),
        ]
    }

    async fn get(&self, characteristic: Characteristic) -> Result<CharValue, HubError> {
        match characteristic {
            Characteristic::Active | Characteristic::InUse => {
                let status = self.ctx.status().await?;
                let open = self.ctx.translate(is_open(&status))?;
                Ok(CharValue::Int(i64::from(open)))
            }
            other => Err(HubError::UnsupportedCharacteristic(other)),
        }
    }

    async fn set(&self, characteristic: Characteristic, value: CharValue) -> Result<(), HubError> {
        if characteristic != Characteristic::Active {
            return Err(HubError::UnsupportedCharacteristic(characteristic));
        }
        let command = if bool_arg(characteristic, value)? { "open" } else { "close" };
        self.ctx.send_command("valve", command, vec![]).await
    }

    fn process_event(&self, event: &DeviceEvent) {
        let status = self.ctx.event_status(event);
        let open = is_open(&status).map(|open| CharValue::Int(i64::from(open)));
        self.ctx.project(Characteristic::Active, open.clone());
        self.ctx.project(Characteristic::InUse, open);
    }
}
