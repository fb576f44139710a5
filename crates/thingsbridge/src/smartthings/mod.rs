//! SmartThings cloud API: wire model and REST client.

mod client;
pub mod model;

pub use client::ApiError;
#[cfg(test)]
pub use client::MockApi;
pub use client::RestClient;
pub use client::SmartThingsApi;
pub use model::Command;
pub use model::ComponentStatus;
pub use model::Device;
pub use model::DeviceEvent;
pub use model::DeviceStatus;
pub use model::StatusError;
