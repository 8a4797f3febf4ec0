//! BlueZ D-Bus back end for the scanner.
//!
//! This back end uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    AdvertisementEvent, EVENT_CHANNEL_BUFFER_SIZE, Radio, RadioEvent, RadioFuture, RadioState,
    ScanError,
};
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport,
    ErrorKind, Session,
};
use futures::{StreamExt, pin_mut};
use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        match state_from_error(&err) {
            RadioState::Unknown => ScanError::Bluetooth(err.to_string()),
            state => ScanError::Unavailable(state),
        }
    }
}

/// Map a BlueZ error to the adapter state it implies.
pub fn state_from_error(err: &bluer::Error) -> RadioState {
    match err.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => RadioState::Unauthorized,
        ErrorKind::NotSupported | ErrorKind::NotAvailable => RadioState::Unsupported,
        ErrorKind::NotReady => RadioState::Resetting,
        _ => RadioState::Unknown,
    }
}

fn state_from_powered(powered: bool) -> RadioState {
    if powered {
        RadioState::PoweredOn
    } else {
        RadioState::PoweredOff
    }
}

/// Rebuild the on-air manufacturer-specific blob from BlueZ's map.
///
/// BlueZ strips the 16-bit company identifier; it is put back in front in
/// little-endian order. With several identifiers the lowest one wins.
pub fn manufacturer_blob(data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    data.iter().min_by_key(|(id, _)| **id).map(|(id, payload)| {
        let mut blob = Vec::with_capacity(2 + payload.len());
        blob.extend_from_slice(&id.to_le_bytes());
        blob.extend_from_slice(payload);
        blob
    })
}

/// [`Radio`] over the default BlueZ adapter.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    tx: mpsc::Sender<RadioEvent>,
    power_watch: JoinHandle<()>,
    discovery: Option<JoinHandle<()>>,
}

/// Open the default adapter.
///
/// The returned channel first carries the adapter's current power state,
/// then every power change and, while discovering, every advertisement.
pub async fn open() -> Result<(BluerRadio, mpsc::Receiver<RadioEvent>), ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    let initial = match adapter.is_powered().await {
        Ok(powered) => state_from_powered(powered),
        Err(e) => {
            warn!("Could not read power state of {}: {e}", adapter.name());
            state_from_error(&e)
        }
    };
    let _ = tx.send(RadioEvent::StateChanged(initial)).await;

    let events = adapter.events().await?;
    let power_tx = tx.clone();
    let power_watch = tokio::spawn(async move {
        pin_mut!(events);
        while let Some(event) = events.next().await {
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event
                && power_tx
                    .send(RadioEvent::StateChanged(state_from_powered(powered)))
                    .await
                    .is_err()
            {
                break;
            }
        }
    });

    Ok((
        BluerRadio {
            _session: session,
            adapter,
            tx,
            power_watch,
            discovery: None,
        },
        rx,
    ))
}

async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<AdvertisementEvent, bluer::Error> {
    let device = adapter.device(address)?;
    let name = device.name().await?;
    let manufacturer_data = device
        .manufacturer_data()
        .await?
        .as_ref()
        .and_then(manufacturer_blob);
    let rssi = device.rssi().await?;

    Ok(AdvertisementEvent {
        name,
        manufacturer_data,
        rssi,
    })
}

impl Radio for BluerRadio {
    fn start_discovery(&mut self) -> RadioFuture<'_> {
        Box::pin(async move {
            if self.discovery.is_some() {
                return Ok(());
            }
            if !self.adapter.is_powered().await? {
                return Err(ScanError::Unavailable(RadioState::PoweredOff));
            }

            // Keep duplicates: every broadcast is a fresh sample
            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            };
            if let Err(e) = self.adapter.set_discovery_filter(filter).await {
                warn!("Failed to set discovery filter: {e}");
            }

            let stream = self.adapter.discover_devices_with_changes().await?;
            let adapter = self.adapter.clone();
            let tx = self.tx.clone();

            self.discovery = Some(tokio::spawn(async move {
                pin_mut!(stream);
                while let Some(event) = stream.next().await {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        continue;
                    };
                    let advertisement = match read_advertisement(&adapter, address).await {
                        Ok(advertisement) => advertisement,
                        Err(e) => {
                            debug!("Failed to read properties of {address}: {e}");
                            continue;
                        }
                    };
                    if tx
                        .send(RadioEvent::Advertisement(advertisement))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }));
            Ok(())
        })
    }

    fn stop_discovery(&mut self) -> RadioFuture<'_> {
        Box::pin(async move {
            // Dropping the discovery stream ends the BlueZ discovery session
            if let Some(discovery) = self.discovery.take() {
                discovery.abort();
            }
            Ok(())
        })
    }
}

impl Drop for BluerRadio {
    fn drop(&mut self) {
        self.power_watch.abort();
        if let Some(discovery) = self.discovery.take() {
            discovery.abort();
        }
    }
}
