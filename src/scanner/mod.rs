//! BLE scanner for Govee thermo-hygrometers.
//!
//! A [`Radio`] back end delivers [`RadioEvent`]s over one channel, so power
//! changes and advertisements are handled one at a time in delivery order.
//! The [`Scanner`] runs discovery only while the adapter is powered on,
//! keeps advertisements whose name starts with the configured prefix, and
//! decodes their manufacturer data into [`Reading`]s.

pub mod bluer;

use crate::decoder::{DecodeError, decode};
use crate::reading::Reading;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Advertised-name prefix of the GV5179 sensor family.
pub const DEFAULT_DEVICE_PREFIX: &str = "GV5179";

/// Delay before retrying a discovery start that failed while powered on.
pub const DISCOVERY_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Channel buffer size for radio events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Error type for radio operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The adapter cannot scan in its current state
    #[error("Bluetooth unavailable: adapter is {0}")]
    Unavailable(RadioState),
}

/// Adapter power state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Unknown,
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Resetting,
}

impl RadioState {
    /// States in which discovery cannot proceed until the adapter changes.
    pub fn is_unavailable(self) -> bool {
        matches!(
            self,
            RadioState::PoweredOff | RadioState::Unauthorized | RadioState::Unsupported
        )
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioState::Unknown => "unknown",
            RadioState::PoweredOn => "powered on",
            RadioState::PoweredOff => "powered off",
            RadioState::Unauthorized => "unauthorized",
            RadioState::Unsupported => "unsupported",
            RadioState::Resetting => "resetting",
        };
        f.write_str(name)
    }
}

/// One received advertisement. Only lives for the duration of its handling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdvertisementEvent {
    /// Advertised local name
    pub name: Option<String>,
    /// Raw manufacturer-specific data, company identifier first
    pub manufacturer_data: Option<Vec<u8>>,
    /// Received signal strength in dBm (informational)
    pub rssi: Option<i16>,
}

/// Events delivered by a radio back end.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    StateChanged(RadioState),
    Advertisement(AdvertisementEvent),
}

/// Future returned by [`Radio`] operations.
pub type RadioFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>>;

/// Radio abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Radio: Send {
    /// Begin delivering advertisements, duplicates included.
    fn start_discovery(&mut self) -> RadioFuture<'_>;

    /// Stop delivering advertisements. Safe to call when not discovering.
    fn stop_discovery(&mut self) -> RadioFuture<'_>;
}

/// What became of a single advertisement.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Arrived while discovery was not active.
    Inactive,
    /// Name missing or without the device prefix.
    Filtered,
    /// Matching device without manufacturer data.
    NoManufacturerData,
    /// Manufacturer data could not be decoded.
    Undecodable(DecodeError),
    Decoded(Reading),
}

/// Filter and decode one advertisement against `prefix`.
pub fn inspect(prefix: &str, advertisement: &AdvertisementEvent) -> Disposition {
    let name = match advertisement.name.as_deref() {
        Some(name) if name.starts_with(prefix) => name,
        _ => return Disposition::Filtered,
    };

    let Some(data) = advertisement.manufacturer_data.as_deref() else {
        return Disposition::NoManufacturerData;
    };

    match decode(data, name) {
        Ok(reading) => Disposition::Decoded(reading),
        Err(e) => Disposition::Undecodable(e),
    }
}

/// Drives discovery on a [`Radio`] from its power-state events.
pub struct Scanner<R: Radio> {
    radio: R,
    prefix: String,
    state: RadioState,
    discovering: bool,
}

impl<R: Radio> Scanner<R> {
    pub fn new(radio: R, prefix: impl Into<String>) -> Self {
        Self {
            radio,
            prefix: prefix.into(),
            state: RadioState::Unknown,
            discovering: false,
        }
    }

    pub fn state(&self) -> RadioState {
        self.state
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering
    }

    /// Handle one radio event.
    ///
    /// Returns the disposition of advertisements and `None` for state changes.
    pub async fn handle(&mut self, event: RadioEvent) -> Option<Disposition> {
        match event {
            RadioEvent::StateChanged(state) => {
                self.on_state_changed(state).await;
                None
            }
            RadioEvent::Advertisement(advertisement) => {
                if !self.discovering {
                    return Some(Disposition::Inactive);
                }
                let disposition = inspect(&self.prefix, &advertisement);
                match &disposition {
                    Disposition::Filtered => {
                        debug!(
                            "Ignoring advertisement from {}",
                            advertisement.name.as_deref().unwrap_or("<unnamed>")
                        );
                    }
                    Disposition::NoManufacturerData => {
                        debug!(
                            "No manufacturer data from {}",
                            advertisement.name.as_deref().unwrap_or_default()
                        );
                    }
                    Disposition::Undecodable(e) => {
                        debug!(
                            "Discarding advertisement from {}: {e}",
                            advertisement.name.as_deref().unwrap_or_default()
                        );
                    }
                    _ => {}
                }
                Some(disposition)
            }
        }
    }

    async fn on_state_changed(&mut self, state: RadioState) {
        let previous = std::mem::replace(&mut self.state, state);
        if previous != state {
            info!("Bluetooth adapter {previous} -> {state}");
        }

        if state == RadioState::PoweredOn {
            self.resume().await;
            return;
        }

        if self.discovering {
            self.discovering = false;
            info!("Discovery halted: adapter is {state}");
            if let Err(e) = self.radio.stop_discovery().await {
                debug!("Stopping halted discovery failed: {e}");
            }
        }
        if state.is_unavailable() {
            warn!("Bluetooth unavailable ({state}); waiting for the adapter to power on");
        }
    }

    /// Whether the adapter is powered on but discovery is not running,
    /// typically because starting it failed.
    pub fn wants_discovery(&self) -> bool {
        self.state == RadioState::PoweredOn && !self.discovering
    }

    /// Start discovery if [`Scanner::wants_discovery`]. On failure the
    /// scanner stays idle until the next call or power-on.
    pub async fn resume(&mut self) {
        if !self.wants_discovery() {
            return;
        }
        match self.radio.start_discovery().await {
            Ok(()) => {
                self.discovering = true;
                info!("Discovering devices named {}*", self.prefix);
            }
            Err(e) => warn!(
                "Failed to start discovery: {e}; retrying in {DISCOVERY_RETRY_INTERVAL:?}"
            ),
        }
    }

    /// Stop discovery for shutdown. Issued even if discovery looks inactive.
    pub async fn stop(&mut self) {
        self.discovering = false;
        if let Err(e) = self.radio.stop_discovery().await {
            warn!("Failed to stop discovery: {e}");
        }
    }
}
