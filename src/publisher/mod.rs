//! Telemetry publisher.
//!
//! The [`Publisher`] owns one broker session through a [`Transport`] and
//! forwards readings to `{topic_prefix}/{device name}`. Publishing is
//! at-most-once: a reading that arrives while the session is not connected
//! is dropped and logged, never buffered.

pub mod backoff;
pub mod mqtt;
pub mod state;

pub use backoff::Backoff;
pub use mqtt::MqttTransport;
pub use state::{ConnectionState, LinkState, TransportEvent};

use crate::output::OutputFormatter;
use crate::output::json::JsonFormatter;
use crate::reading::Reading;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default topic prefix.
pub const DEFAULT_TOPIC_PREFIX: &str = "govee/sensors";

/// Broker login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to connect. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Topic prefix without a trailing `/`.
    pub topic_prefix: String,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl BrokerTarget {
    /// Topic for readings from device `name`.
    pub fn topic_for(&self, name: &str) -> String {
        format!("{}/{}", self.topic_prefix, name)
    }
}

impl fmt::Display for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Errors returned when a reading cannot be handed to the transport.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("broker not connected ({0})")]
    NotConnected(ConnectionState),
    #[error("failed to encode payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("MQTT client error: {0}")]
    Client(String),
}

/// What happened to a reading passed to [`Publisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport as one fire-and-forget message.
    Sent,
    /// Discarded; the reason has been logged.
    Dropped,
}

/// Transport abstraction to enable deterministic unit tests without a broker.
///
/// Implementations report connection progress by applying
/// [`TransportEvent`]s to the [`LinkState`] they receive in `connect`.
pub trait Transport: Send {
    /// Open a session to `target` in the background. Must not block.
    fn connect(&mut self, target: &BrokerTarget, link: LinkState);

    /// Enqueue one QoS 0, non-retained message. Must not block.
    fn publish(&mut self, topic: String, payload: Vec<u8>) -> Result<(), PublishError>;

    /// Close the session without waiting for in-flight messages.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Forwards readings to the broker over a single long-lived session.
pub struct Publisher<T: Transport> {
    target: BrokerTarget,
    transport: T,
    formatter: Box<dyn OutputFormatter>,
    link: LinkState,
    session_open: bool,
}

impl<T: Transport> Publisher<T> {
    pub fn new(target: BrokerTarget, transport: T) -> Self {
        Self {
            target,
            transport,
            formatter: Box::new(JsonFormatter),
            link: LinkState::default(),
            session_open: false,
        }
    }

    pub fn target(&self) -> &BrokerTarget {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        self.link.get()
    }

    /// Start connecting. Returns immediately; a no-op while a session is
    /// already open (connecting, connected, or waiting to reconnect).
    pub fn connect(&mut self) {
        if self.session_open {
            debug!("Connect requested while {}; ignoring", self.link.get());
            return;
        }

        info!(
            "Connecting to MQTT broker {} as {}",
            self.target, self.target.client_id
        );
        self.link.apply(&TransportEvent::ConnectRequested);
        self.transport.connect(&self.target, self.link.clone());
        self.session_open = true;
    }

    /// Close the session. A no-op when no session is open.
    pub async fn disconnect(&mut self) {
        if !self.session_open {
            return;
        }

        info!("Disconnecting from MQTT broker {}", self.target);
        self.transport.disconnect().await;
        self.link.reset();
        self.session_open = false;
    }

    /// Publish a reading, or drop it if the broker is not connected.
    pub fn publish(&mut self, reading: &Reading) -> Delivery {
        match self.try_publish(reading) {
            Ok(topic) => {
                debug!("Published reading to {topic}");
                Delivery::Sent
            }
            Err(e) => {
                warn!("Dropped reading from {}: {e}", reading.name());
                Delivery::Dropped
            }
        }
    }

    fn try_publish(&mut self, reading: &Reading) -> Result<String, PublishError> {
        let state = self.link.get();
        if state != ConnectionState::Connected {
            return Err(PublishError::NotConnected(state));
        }

        let topic = self.target.topic_for(reading.name());
        let payload = self.formatter.format(reading)?;
        self.transport
            .publish(topic.clone(), payload.into_bytes())?;
        Ok(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::test_utils::{FakeTransport, TEST_NAME, sample_frame, test_target};

    fn reading() -> Reading {
        decode(&sample_frame(), TEST_NAME).unwrap()
    }

    #[test]
    fn test_topic_for() {
        assert_eq!(
            test_target().topic_for("GV5179_ABCD"),
            "govee/sensors/GV5179_ABCD"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: "bridge".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("bridge"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_publish_while_disconnected_is_dropped() {
        let transport = FakeTransport::default();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_publish_while_connecting_is_dropped() {
        let transport = FakeTransport::default();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.connect();
        assert_eq!(publisher.state(), ConnectionState::Connecting);
        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_accepted_handshake_unblocks_publishing() {
        let transport = FakeTransport::default();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.connect();
        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);

        transport.report(TransportEvent::Accepted);
        assert_eq!(publisher.state(), ConnectionState::Connected);
        assert_eq!(publisher.publish(&reading()), Delivery::Sent);

        assert_eq!(
            transport.sent(),
            vec![(
                "govee/sensors/GV5179-Test".to_string(),
                r#"{"name":"GV5179-Test","temperature":4.0,"humidity":1.3,"battery":85}"#
                    .to_string()
            )]
        );
    }

    #[test]
    fn test_rejected_handshake_keeps_dropping() {
        let transport = FakeTransport::default();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.connect();
        transport.report(TransportEvent::Rejected("NotAuthorized".into()));

        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_disconnect_notification_drops_until_reconnected() {
        let transport = FakeTransport::accepting();
        let mut publisher = Publisher::new(test_target(), transport.clone());
        publisher.connect();

        assert_eq!(publisher.publish(&reading()), Delivery::Sent);

        transport.report(TransportEvent::Closed("connection reset".into()));
        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);

        transport.report(TransportEvent::ConnectRequested);
        transport.report(TransportEvent::Accepted);
        assert_eq!(publisher.publish(&reading()), Delivery::Sent);

        assert_eq!(transport.sent().len(), 2);
        // Reconnects are the transport's job; the publisher did not reopen
        assert_eq!(transport.connects(), 1);
    }

    #[test]
    fn test_each_publish_is_one_message() {
        let transport = FakeTransport::accepting();
        let mut publisher = Publisher::new(test_target(), transport.clone());
        publisher.connect();

        let reading = reading();
        for _ in 0..3 {
            assert_eq!(publisher.publish(&reading), Delivery::Sent);
        }
        assert_eq!(transport.sent().len(), 3);
    }

    #[test]
    fn test_transport_failure_is_a_drop() {
        let transport = FakeTransport::accepting();
        transport.fail_publishes();
        let mut publisher = Publisher::new(test_target(), transport.clone());
        publisher.connect();

        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let transport = FakeTransport::accepting();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.connect();
        publisher.connect();
        transport.report(TransportEvent::Closed("gone".into()));
        publisher.connect();

        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = FakeTransport::accepting();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.disconnect().await;
        assert_eq!(transport.disconnects(), 0);

        publisher.connect();
        publisher.disconnect().await;
        publisher.disconnect().await;

        assert_eq!(transport.disconnects(), 1);
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(publisher.publish(&reading()), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting() {
        let transport = FakeTransport::default();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.connect();
        assert_eq!(publisher.state(), ConnectionState::Connecting);
        publisher.disconnect().await;

        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_opens_new_session() {
        let transport = FakeTransport::accepting();
        let mut publisher = Publisher::new(test_target(), transport.clone());

        publisher.connect();
        publisher.disconnect().await;
        publisher.connect();

        assert_eq!(transport.connects(), 2);
        assert_eq!(publisher.state(), ConnectionState::Connected);
    }
}
