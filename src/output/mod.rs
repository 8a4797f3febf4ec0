//! Payload formatters for decoded readings.
//!
//! The publisher hands every reading to an [`OutputFormatter`] and sends the
//! resulting bytes as the message body.

pub mod json;

use crate::reading::Reading;

/// Trait for formatting readings into message payloads.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading.
    ///
    /// # Errors
    /// Returns the serializer error if the reading cannot be encoded.
    fn format(&self, reading: &Reading) -> Result<String, serde_json::Error>;
}
