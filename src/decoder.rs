//! Frame decoder for Govee thermo-hygrometer manufacturer data.
//!
//! Layout of the manufacturer-specific blob (company identifier included):
//!
//! | Offset | Field                                          |
//! |--------|------------------------------------------------|
//! | 0-3    | company identifier and vendor framing, ignored |
//! | 4-6    | 24-bit big-endian combined temperature/humidity |
//! | 7      | battery percentage                             |
//!
//! The combined value packs `temperature * 10` in the thousands and above
//! and `humidity * 10` in the last three decimal digits.

use crate::reading::Reading;
use thiserror::Error;

/// Shortest manufacturer blob that carries a full reading.
pub const MIN_FRAME_LEN: usize = 8;

/// Error types for decoding Govee frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than [`MIN_FRAME_LEN`]; holds the actual length.
    #[error("Insufficient data: expected at least 8 bytes, got {0}")]
    InsufficientData(usize),
}

/// Decode a manufacturer data blob into a [`Reading`] for device `name`.
///
/// The combined value is treated as unsigned. Sensors that set a sign bit
/// for sub-zero temperatures come out as large positive readings; see
/// DESIGN.md before changing this.
///
/// # Errors
/// Returns [`DecodeError::InsufficientData`] when `data` is shorter than
/// [`MIN_FRAME_LEN`].
pub fn decode(data: &[u8], name: &str) -> Result<Reading, DecodeError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(DecodeError::InsufficientData(data.len()));
    }

    let raw = u32::from_be_bytes([0, data[4], data[5], data[6]]);
    let temperature = f64::from(raw / 1000) / 10.0;
    let humidity = f64::from(raw % 1000) / 10.0;

    Ok(Reading::new(name.to_string(), temperature, humidity, data[7]))
}
