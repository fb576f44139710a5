//! Capability -> service resolution.
//!
//! Resolution runs once per component. Combo specs are tried first, richest
//! shape first, so a coherent multi-capability device (an air conditioner, a
//! thermostat) is never split into generic single-capability services. The
//! single-capability table then picks up whatever is left. Declaration order
//! inside each table breaks ties and is load-bearing.

use std::cmp::Reverse;
use std::sync::LazyLock;

use crate::services::ServiceKind;

/// A service claiming one capability on its own.
#[derive(Debug)]
pub struct SingleSpec {
    pub capability: &'static str,
    pub kind: ServiceKind,
}

/// A service that needs a set of capabilities together.
#[derive(Debug)]
pub struct ComboSpec {
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub kind: ServiceKind,
}

/// One resolved binding: the service kind and the capabilities it claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: ServiceKind,
    pub capabilities: Vec<String>,
}

const THERMOSTAT_OPTIONAL: &[&str] = &["thermostatOperatingState", "relativeHumidityMeasurement"];

pub static COMBO_SPECS: &[ComboSpec] = &[
    ComboSpec {
        required: &[
            "switch",
            "airConditionerMode",
            "airConditionerFanMode",
            "thermostatCoolingSetpoint",
            "temperatureMeasurement",
        ],
        optional: &[
            "fanOscillationMode",
            "relativeHumidityMeasurement",
            "custom.airConditionerOptionalMode",
        ],
        kind: ServiceKind::AirConditioner,
    },
    ComboSpec {
        required: &[
            "temperatureMeasurement",
            "thermostatMode",
            "thermostatHeatingSetpoint",
            "thermostatCoolingSetpoint",
        ],
        optional: THERMOSTAT_OPTIONAL,
        kind: ServiceKind::Thermostat,
    },
    ComboSpec {
        required: &[
            "temperatureMeasurement",
            "thermostatMode",
            "thermostatHeatingSetpoint",
        ],
        optional: THERMOSTAT_OPTIONAL,
        kind: ServiceKind::Thermostat,
    },
    ComboSpec {
        required: &[
            "temperatureMeasurement",
            "thermostatMode",
            "thermostatCoolingSetpoint",
        ],
        optional: THERMOSTAT_OPTIONAL,
        kind: ServiceKind::Thermostat,
    },
    ComboSpec {
        required: &["temperatureMeasurement", "thermostatHeatingSetpoint"],
        optional: THERMOSTAT_OPTIONAL,
        kind: ServiceKind::Thermostat,
    },
    ComboSpec {
        required: &["switch", "fanSpeed"],
        optional: &["fanOscillationMode"],
        kind: ServiceKind::Fan,
    },
    ComboSpec {
        required: &["switch", "switchLevel"],
        optional: &["colorControl", "colorTemperature"],
        kind: ServiceKind::Light,
    },
    ComboSpec {
        required: &["switch", "colorControl"],
        optional: &["colorTemperature"],
        kind: ServiceKind::Light,
    },
    ComboSpec {
        required: &["switch", "colorTemperature"],
        optional: &[],
        kind: ServiceKind::Light,
    },
    ComboSpec {
        required: &["windowShade", "windowShadeLevel"],
        optional: &[],
        kind: ServiceKind::WindowCovering,
    },
    ComboSpec {
        required: &["audioMute", "audioVolume"],
        optional: &[],
        kind: ServiceKind::Speaker,
    },
];

// Secondary/diagnostic capabilities (contact, battery) go last.
pub static SINGLE_SPECS: &[SingleSpec] = &[
    SingleSpec { capability: "doorControl", kind: ServiceKind::GarageDoor },
    SingleSpec { capability: "lock", kind: ServiceKind::Lock },
    SingleSpec { capability: "windowShadeLevel", kind: ServiceKind::WindowCovering },
    SingleSpec { capability: "windowShade", kind: ServiceKind::WindowCovering },
    SingleSpec { capability: "audioVolume", kind: ServiceKind::Speaker },
    SingleSpec { capability: "audioMute", kind: ServiceKind::Speaker },
    SingleSpec { capability: "valve", kind: ServiceKind::Valve },
    SingleSpec { capability: "switch", kind: ServiceKind::Switch },
    SingleSpec { capability: "motionSensor", kind: ServiceKind::MotionSensor },
    SingleSpec { capability: "waterSensor", kind: ServiceKind::LeakSensor },
    SingleSpec { capability: "smokeDetector", kind: ServiceKind::SmokeSensor },
    SingleSpec { capability: "carbonMonoxideDetector", kind: ServiceKind::CarbonMonoxideSensor },
    SingleSpec { capability: "presenceSensor", kind: ServiceKind::OccupancySensor },
    SingleSpec { capability: "temperatureMeasurement", kind: ServiceKind::TemperatureSensor },
    SingleSpec { capability: "relativeHumidityMeasurement", kind: ServiceKind::HumiditySensor },
    SingleSpec { capability: "illuminanceMeasurement", kind: ServiceKind::LightSensor },
    SingleSpec { capability: "contactSensor", kind: ServiceKind::ContactSensor },
    SingleSpec { capability: "battery", kind: ServiceKind::Battery },
];

static STANDARD: LazyLock<CapabilityResolver> =
    LazyLock::new(|| CapabilityResolver::new(COMBO_SPECS, SINGLE_SPECS));

/// Maps a component's capability list to the services that expose it.
#[derive(Debug)]
pub struct CapabilityResolver {
    /// Combo specs by descending required-set size, declaration order on ties.
    combos: Vec<&'static ComboSpec>,
    singles: &'static [SingleSpec],
}

impl CapabilityResolver {
    pub fn new(combos: &'static [ComboSpec], singles: &'static [SingleSpec]) -> Self {
        let mut combos: Vec<&'static ComboSpec> = combos.iter().collect();
        // Stable sort keeps declaration order among equal sizes.
        combos.sort_by_key(|spec| Reverse(spec.required.len()));
        Self { combos, singles }
    }

    /// The built-in tables, initialized once per process.
    pub fn standard() -> &'static CapabilityResolver {
        &STANDARD
    }

    /// Resolve a component's capabilities into bindings.
    ///
    /// Every capability is claimed by at most one binding. Capabilities no
    /// table entry names are left unexposed.
    pub fn resolve(&self, capabilities: &[String]) -> Vec<Resolution> {
        let mut uncovered: Vec<&str> = capabilities.iter().map(String::as_str).collect();
        let mut resolved = Vec::new();

        for spec in &self.combos {
            if !spec.required.iter().all(|id| uncovered.contains(id)) {
                continue;
            }
            let claimed: Vec<String> = spec
                .required
                .iter()
                .chain(spec.optional.iter().filter(|id| uncovered.contains(*id)))
                .map(|id| id.to_string())
                .collect();
            uncovered.retain(|id| !claimed.iter().any(|c| c == id));
            resolved.push(Resolution {
                kind: spec.kind,
                capabilities: claimed,
            });
        }

        for spec in self.singles {
            if let Some(pos) = uncovered.iter().position(|id| *id == spec.capability) {
                uncovered.remove(pos);
                resolved.push(Resolution {
                    kind: spec.kind,
                    capabilities: vec![spec.capability.to_string()],
                });
            }
        }

        resolved
    }
}
