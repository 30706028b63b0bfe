//! Distance and pace conversions.

use serde::{Deserialize, Serialize};

pub const MILES_PER_METER: f64 = 0.000_621_371_192_237_334;
pub const METERS_PER_MILE: f64 = 1609.344;
pub const METERS_PER_KILOMETER: f64 = 1000.0;

/// Unit the per-distance part of a pace is expressed in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaceUnit {
    PerKm,
    PerMile,
}

impl Default for PaceUnit {
    fn default() -> Self {
        PaceUnit::PerKm
    }
}

impl PaceUnit {
    pub fn meters(self) -> f64 {
        match self {
            PaceUnit::PerKm => METERS_PER_KILOMETER,
            PaceUnit::PerMile => METERS_PER_MILE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PaceUnit::PerKm => "s/km",
            PaceUnit::PerMile => "s/mi",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    Meters,
    Miles,
}

impl Default for DistanceUnit {
    fn default() -> Self {
        DistanceUnit::Meters
    }
}

impl DistanceUnit {
    pub fn label(self) -> &'static str {
        match self {
            DistanceUnit::Meters => "m",
            DistanceUnit::Miles => "mi",
        }
    }
}

/// Round half away from zero to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

pub fn meters_to_miles(meters: f64, precision: u32) -> f64 {
    round_to(meters * MILES_PER_METER, precision)
}

pub fn miles_to_meters(miles: f64, precision: u32) -> f64 {
    round_to(miles * METERS_PER_MILE, precision)
}

/// Convert a speed in m/s into seconds per `unit`.
///
/// Zero speed is the "no rate" sentinel and maps to zero rather than infinity.
/// Missing or non-finite speeds map to `None`.
pub fn speed_to_pace(speed_mps: Option<f64>, unit: PaceUnit, precision: u32) -> Option<f64> {
    let speed = speed_mps.filter(|v| v.is_finite())?;
    if speed == 0.0 {
        return Some(0.0);
    }
    Some(round_to(unit.meters() / speed, precision))
}
