//! Shared fixtures and fakes for unit tests.

use crate::publisher::{
    BrokerTarget, DEFAULT_PORT, DEFAULT_TOPIC_PREFIX, LinkState, PublishError, Transport,
    TransportEvent,
};
use crate::scanner::{AdvertisementEvent, Radio, RadioFuture, RadioState, ScanError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A device name that passes the default prefix filter.
pub const TEST_NAME: &str = "GV5179-Test";

/// Frame encoding 4.0 C, 1.3 %, battery 85.
pub fn sample_frame() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x9C, 0x4D, 0x55]
}

pub fn advertisement(name: &str, manufacturer_data: Vec<u8>) -> AdvertisementEvent {
    AdvertisementEvent {
        name: Some(name.to_string()),
        manufacturer_data: Some(manufacturer_data),
        rssi: Some(-67),
    }
}

pub fn test_target() -> BrokerTarget {
    BrokerTarget {
        host: "broker.local".to_string(),
        port: DEFAULT_PORT,
        credentials: None,
        topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        client_id: "govee-ble-mqtt-test".to_string(),
        keep_alive: Duration::from_secs(30),
    }
}

/// Radio that records `start`/`stop` calls.
#[derive(Debug, Default, Clone)]
pub struct FakeRadio {
    calls: Arc<Mutex<Vec<&'static str>>>,
    fail_next_start: Arc<AtomicBool>,
}

impl FakeRadio {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }
}

impl Radio for FakeRadio {
    fn start_discovery(&mut self) -> RadioFuture<'_> {
        self.calls.lock().unwrap().push("start");
        let fail = self.fail_next_start.swap(false, Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                Err(ScanError::Unavailable(RadioState::PoweredOff))
            } else {
                Ok(())
            }
        })
    }

    fn stop_discovery(&mut self) -> RadioFuture<'_> {
        self.calls.lock().unwrap().push("stop");
        Box::pin(async { Ok(()) })
    }
}

/// Transport that records messages instead of sending them.
///
/// Tests play the broker by calling [`FakeTransport::report`].
#[derive(Debug, Default, Clone)]
pub struct FakeTransport {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    link: Arc<Mutex<Option<LinkState>>>,
    accept_on_connect: bool,
    fail_publishes: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl FakeTransport {
    /// A transport whose broker accepts every connection immediately.
    pub fn accepting() -> Self {
        Self {
            accept_on_connect: true,
            ..Self::default()
        }
    }

    pub fn report(&self, event: TransportEvent) {
        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.apply(&event);
        }
    }

    pub fn fail_publishes(&self) {
        self.fail_publishes.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, _target: &BrokerTarget, link: LinkState) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.accept_on_connect {
            link.apply(&TransportEvent::Accepted);
        }
        *self.link.lock().unwrap() = Some(link);
    }

    fn publish(&mut self, topic: String, payload: Vec<u8>) -> Result<(), PublishError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(PublishError::Client("request queue full".into()));
        }
        let payload = String::from_utf8(payload).unwrap();
        self.sent.lock().unwrap().push((topic, payload));
        Ok(())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}
