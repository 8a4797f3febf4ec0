//! Single-line JSON payload formatter.

use crate::output::OutputFormatter;
use crate::reading::Reading;

/// Formats readings as `{"name":..,"temperature":..,"humidity":..,"battery":..}`.
///
/// Temperature and humidity are multiples of 0.1, which serde_json renders
/// with exactly one fractional digit (`4.0`, `1.3`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format(&self, reading: &Reading) -> Result<String, serde_json::Error> {
        serde_json::to_string(reading)
    }
}
