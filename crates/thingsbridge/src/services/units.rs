//! Unit conversions between cloud attribute values and hub characteristics.

/// Mired range accepted by the hub's ColorTemperature characteristic.
pub const MIN_MIRED: i64 = 140;
pub const MAX_MIRED: i64 = 500;

/// Percentage covered by one `fanSpeed` step.
pub const FAN_SPEED_STEP: i64 = 25;

pub fn is_fahrenheit(unit: Option<&str>) -> bool {
    matches!(unit, Some("F"))
}

fn round_to(value: f64, steps_per_unit: f64) -> f64 {
    (value * steps_per_unit).round() / steps_per_unit
}

/// Reported temperature in Celsius, to one decimal.
pub fn to_celsius(value: f64, unit: Option<&str>) -> f64 {
    let celsius = if is_fahrenheit(unit) {
        (value - 32.0) * 5.0 / 9.0
    } else {
        value
    };
    round_to(celsius, 10.0)
}

/// Celsius setpoint converted to the device's unit: whole degrees
/// Fahrenheit, half degrees Celsius.
pub fn from_celsius(celsius: f64, unit: Option<&str>) -> f64 {
    if is_fahrenheit(unit) {
        (celsius * 9.0 / 5.0 + 32.0).round()
    } else {
        round_to(celsius, 2.0)
    }
}

/// `colorControl.hue` (0-100) to hub degrees (0-360).
pub fn hue_to_degrees(percent: f64) -> f64 {
    (percent * 3.6).clamp(0.0, 360.0)
}

pub fn degrees_to_hue(degrees: f64) -> i64 {
    (degrees / 3.6).round().clamp(0.0, 100.0) as i64
}

pub fn kelvin_to_mired(kelvin: f64) -> i64 {
    if kelvin <= 0.0 {
        return MAX_MIRED;
    }
    ((1_000_000.0 / kelvin).round() as i64).clamp(MIN_MIRED, MAX_MIRED)
}

pub fn mired_to_kelvin(mired: i64) -> i64 {
    let mired = mired.clamp(MIN_MIRED, MAX_MIRED);
    (1_000_000.0 / mired as f64).round() as i64
}

pub fn fan_speed_to_percent(step: f64) -> i64 {
    (step.round().clamp(0.0, 4.0) as i64) * FAN_SPEED_STEP
}

pub fn percent_to_fan_speed(percent: i64) -> i64 {
    (percent.clamp(0, 100) as f64 / FAN_SPEED_STEP as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_round_trip_in_fahrenheit() {
        assert_eq!(to_celsius(68.0, Some("F")), 20.0);
        assert_eq!(to_celsius(21.3, Some("C")), 21.3);
        assert_eq!(to_celsius(21.0, None), 21.0);
        assert_eq!(from_celsius(20.0, Some("F")), 68.0);
        assert_eq!(from_celsius(21.3, Some("C")), 21.5);
    }

    #[test]
    fn test_hue_scaling() {
        assert_eq!(hue_to_degrees(50.0), 180.0);
        assert_eq!(hue_to_degrees(120.0), 360.0);
        assert_eq!(degrees_to_hue(180.0), 50);
        assert_eq!(degrees_to_hue(360.0), 100);
    }

    #[test]
    fn test_color_temperature_is_clamped() {
        assert_eq!(kelvin_to_mired(4000.0), 250);
        assert_eq!(kelvin_to_mired(10000.0), MIN_MIRED);
        assert_eq!(kelvin_to_mired(1000.0), MAX_MIRED);
        assert_eq!(mired_to_kelvin(250), 4000);
        assert_eq!(mired_to_kelvin(50), 7143);
    }

    #[test]
    fn test_fan_speed_steps() {
        assert_eq!(fan_speed_to_percent(0.0), 0);
        assert_eq!(fan_speed_to_percent(3.0), 75);
        assert_eq!(fan_speed_to_percent(7.0), 100);
        assert_eq!(fan_speed_to_percent(1e300), 100);
        assert_eq!(fan_speed_to_percent(-1e300), 0);
        assert_eq!(percent_to_fan_speed(60), 2);
        assert_eq!(percent_to_fan_speed(100), 4);
    }
}
