//! Configuration file parsing and structures.
//!
//! thingsbridge reads one TOML file. The `[smartthings]` table keeps the
//! option names the bridge has always recognized (`BaseURL`,
//! `PollSensorsSeconds`, ...), so existing settings carry over unchanged.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT_BASE_URL: &str = "https://api.smartthings.com/v1/";

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    pub smartthings: SmartThingsConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// Cloud account and device exposure settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SmartThingsConfig {
    #[serde(rename = "BaseURL", default = "default_base_url")]
    pub base_url: String,

    pub access_token: String,

    /// Push-event token. When set, polling is disabled for every accessory.
    /// A blank value counts as unset.
    #[serde(default, deserialize_with = "non_blank")]
    pub webhook_token: Option<String>,

    #[serde(default = "default_sensor_poll")]
    pub poll_sensors_seconds: u64,

    #[serde(default = "default_poll")]
    pub poll_switches_and_lights_seconds: u64,

    #[serde(default = "default_poll")]
    pub poll_locks_seconds: u64,

    #[serde(default = "default_poll")]
    pub poll_doors_seconds: u64,

    #[serde(default = "default_poll")]
    pub poll_window_shades_seconds: u64,

    #[serde(default = "default_poll")]
    pub poll_speakers_seconds: u64,

    /// Location names whose devices are not exposed (case-insensitive)
    #[serde(default)]
    pub ignore_locations: Vec<String>,

    #[serde(default)]
    pub expose_humidity_sensor_for_air_conditioners: bool,

    #[serde(default)]
    pub optional_mode_for_air_conditioners: Option<OptionalMode>,
}

fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_sensor_poll() -> u64 {
    5
}

fn default_poll() -> u64 {
    10
}

/// Air-conditioner mode exposed as an extra switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OptionalMode {
    Sleep,
    Speed,
    WindFree,
    WindFreeSleep,
}

impl OptionalMode {
    /// Value of `custom.airConditionerOptionalMode.acOptionalMode` for this mode
    pub fn device_value(self) -> &'static str {
        match self {
            OptionalMode::Sleep => "sleep",
            OptionalMode::Speed => "speed",
            OptionalMode::WindFree => "windFree",
            OptionalMode::WindFreeSleep => "windFreeSleep",
        }
    }
}

/// Local HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

/// Which poll interval setting a polled characteristic follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollGroup {
    Sensors,
    SwitchesAndLights,
    Locks,
    Doors,
    WindowShades,
    Speakers,
}

/// Runtime options handed to every accessory and binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOptions {
    pub push_enabled: bool,
    pub poll_sensors: u64,
    pub poll_switches_and_lights: u64,
    pub poll_locks: u64,
    pub poll_doors: u64,
    pub poll_window_shades: u64,
    pub poll_speakers: u64,
    pub expose_ac_humidity: bool,
    pub ac_optional_mode: Option<OptionalMode>,
}

impl BridgeOptions {
    /// Interval for a poll group; `None` when that group is disabled.
    pub fn poll_interval(&self, group: PollGroup) -> Option<Duration> {
        let seconds = match group {
            PollGroup::Sensors => self.poll_sensors,
            PollGroup::SwitchesAndLights => self.poll_switches_and_lights,
            PollGroup::Locks => self.poll_locks,
            PollGroup::Doors => self.poll_doors,
            PollGroup::WindowShades => self.poll_window_shades,
            PollGroup::Speakers => self.poll_speakers,
        };
        (seconds > 0).then(|| Duration::from_secs(seconds))
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            push_enabled: false,
            poll_sensors: default_sensor_poll(),
            poll_switches_and_lights: default_poll(),
            poll_locks: default_poll(),
            poll_doors: default_poll(),
            poll_window_shades: default_poll(),
            poll_speakers: default_poll(),
            expose_ac_humidity: false,
            ac_optional_mode: None,
        }
    }
}

impl From<&SmartThingsConfig> for BridgeOptions {
    fn from(config: &SmartThingsConfig) -> Self {
        Self {
            push_enabled: config.webhook_token.is_some(),
            poll_sensors: config.poll_sensors_seconds,
            poll_switches_and_lights: config.poll_switches_and_lights_seconds,
            poll_locks: config.poll_locks_seconds,
            poll_doors: config.poll_doors_seconds,
            poll_window_shades: config.poll_window_shades_seconds,
            poll_speakers: config.poll_speakers_seconds,
            expose_ac_humidity: config.expose_humidity_sensor_for_air_conditioners,
            ac_optional_mode: config.optional_mode_for_air_conditioners,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}
