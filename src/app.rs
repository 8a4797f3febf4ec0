//! Core application runner (business logic) for `govee-ble-mqtt`.
//!
//! This module is intentionally decoupled from CLI parsing, signal handling
//! and process exit codes so it can be tested deterministically with an
//! injected radio and transport.

use crate::config::Options;
use crate::publisher::{Delivery, MqttTransport, Publisher, Transport};
use crate::scanner::{
    DISCOVERY_RETRY_INTERVAL, Disposition, Radio, RadioEvent, ScanError, Scanner,
};
use log::{info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

/// Delay between attempts to open the Bluetooth adapter.
pub const OPEN_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Counters for one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Advertisements received while discovering
    pub advertisements: u64,
    /// Advertisements from other devices
    pub filtered: u64,
    /// Matching advertisements with missing or short manufacturer data
    pub undecodable: u64,
    pub published: u64,
    /// Decoded readings dropped by the publisher
    pub dropped: u64,
}

impl PipelineStats {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Inactive => return,
            Disposition::Filtered => self.filtered += 1,
            Disposition::NoManufacturerData | Disposition::Undecodable(_) => {
                self.undecodable += 1
            }
            Disposition::Decoded(_) => {}
        }
        self.advertisements += 1;
    }
}

/// Run the bridge against the default Bluetooth adapter and an MQTT broker
/// until `shutdown` resolves.
pub async fn run<F>(options: Options, shutdown: F) -> PipelineStats
where
    F: Future<Output = ()>,
{
    let publisher = Publisher::new(options.broker_target(), MqttTransport::new());
    run_with_io(
        publisher,
        crate::scanner::bluer::open,
        options.device_prefix,
        shutdown,
    )
    .await
}

/// Connect `publisher`, open a radio with `open_radio` and run the pipeline.
///
/// A radio that cannot be opened (no adapter, access denied, BlueZ not yet
/// running) is retried every [`OPEN_RETRY_INTERVAL`] while the publisher
/// stays connected. Shutdown is honoured while waiting.
pub async fn run_with_io<R, T, O, Fut, F>(
    mut publisher: Publisher<T>,
    mut open_radio: O,
    device_prefix: String,
    shutdown: F,
) -> PipelineStats
where
    R: Radio,
    T: Transport,
    O: FnMut() -> Fut,
    Fut: Future<Output = Result<(R, mpsc::Receiver<RadioEvent>), ScanError>>,
    F: Future<Output = ()>,
{
    publisher.connect();
    tokio::pin!(shutdown);

    let (radio, events) = loop {
        let opened = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            opened = open_radio() => Some(opened),
        };
        match opened {
            None => {
                info!("Shutdown requested before the Bluetooth adapter opened");
                publisher.disconnect().await;
                return PipelineStats::default();
            }
            Some(Ok(opened)) => break opened,
            Some(Err(e)) => {
                warn!(
                    "Failed to open Bluetooth adapter: {e}; retrying in {OPEN_RETRY_INTERVAL:?}"
                );
            }
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested before the Bluetooth adapter opened");
                publisher.disconnect().await;
                return PipelineStats::default();
            }
            _ = sleep(OPEN_RETRY_INTERVAL) => {}
        }
    };

    let scanner = Scanner::new(radio, device_prefix);
    run_pipeline(scanner, events, publisher, shutdown).await
}

/// Feed radio events through the scanner into the publisher until
/// `shutdown` resolves or the event channel closes, then stop discovery and
/// disconnect.
///
/// Events are handled one at a time in delivery order. No event is handled
/// after shutdown begins. While the adapter is powered on but discovery failed
/// to start, the start is retried every [`DISCOVERY_RETRY_INTERVAL`].
pub async fn run_pipeline<R, T, F>(
    mut scanner: Scanner<R>,
    mut events: mpsc::Receiver<RadioEvent>,
    mut publisher: Publisher<T>,
    shutdown: F,
) -> PipelineStats
where
    R: Radio,
    T: Transport,
    F: Future<Output = ()>,
{
    let mut stats = PipelineStats::default();
    tokio::pin!(shutdown);

    let retry = sleep(DISCOVERY_RETRY_INTERVAL);
    tokio::pin!(retry);
    let mut retry_armed = false;

    loop {
        if scanner.wants_discovery() && !retry_armed {
            retry
                .as_mut()
                .reset(Instant::now() + DISCOVERY_RETRY_INTERVAL);
            retry_armed = true;
        }

        let event = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = &mut retry, if retry_armed => {
                retry_armed = false;
                scanner.resume().await;
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    info!("Radio event stream closed");
                    break;
                }
            },
        };

        let Some(disposition) = scanner.handle(event).await else {
            continue;
        };
        stats.record(&disposition);

        if let Disposition::Decoded(reading) = disposition {
            match publisher.publish(&reading) {
                Delivery::Sent => stats.published += 1,
                Delivery::Dropped => stats.dropped += 1,
            }
        }
    }

    scanner.stop().await;
    publisher.disconnect().await;

    info!(
        "Handled {} advertisements: {} published, {} dropped, {} filtered, {} undecodable",
        stats.advertisements, stats.published, stats.dropped, stats.filtered, stats.undecodable
    );
    stats
}
