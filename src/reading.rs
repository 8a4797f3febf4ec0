//! Decoded sensor reading.

use serde::Serialize;

/// A reading decoded from a Govee thermo-hygrometer advertisement.
///
/// Values are kept exactly as the frame encodes them:
/// - Temperature in Celsius, one fractional digit
/// - Relative humidity in percent, one fractional digit
/// - Battery level in percent (0-255, not clamped)
///
/// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    name: String,
    temperature: f64,
    humidity: f64,
    battery: u8,
}

impl Reading {
    pub(crate) fn new(name: String, temperature: f64, humidity: f64, battery: u8) -> Self {
        Self {
            name,
            temperature,
            humidity,
            battery,
        }
    }

    /// Advertised device name, e.g. `GV5179_A1B2`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn battery(&self) -> u8 {
        self.battery
    }
}
