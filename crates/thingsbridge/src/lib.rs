pub mod accessory;
#[cfg(feature = "api")]
pub mod api;
pub mod bridge;
pub mod config;
pub mod hub;
pub mod services;
pub mod smartthings;

pub use accessory::MultiServiceAccessory;
pub use bridge::Bridge;
pub use config::Config;
pub use config::LogLevel;
pub use hub::LocalHub;
pub use hub::MemoryHub;
