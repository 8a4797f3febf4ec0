//! MQTT transport backed by `rumqttc`.
//!
//! A driver task polls the client's event loop, translates connection
//! acknowledgements and errors into [`TransportEvent`]s, and reconnects
//! with [`Backoff`] after every failure until the session is closed.

use super::{Backoff, BrokerTarget, LinkState, PublishError, Transport, TransportEvent};
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS, Request,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Capacity of the client's request queue.
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` lets the driver flush the DISCONNECT packet.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

impl From<ClientError> for PublishError {
    fn from(err: ClientError) -> Self {
        PublishError::Client(err.to_string())
    }
}

/// Build client options for `target`.
pub fn mqtt_options(target: &BrokerTarget) -> MqttOptions {
    let mut options = MqttOptions::new(&target.client_id, &target.host, target.port);
    options.set_keep_alive(target.keep_alive);
    options.set_clean_session(true);
    if let Some(credentials) = &target.credentials {
        options.set_credentials(&credentials.username, &credentials.password);
    }
    options
}

struct Session {
    client: AsyncClient,
    stop: oneshot::Sender<()>,
    driver: JoinHandle<()>,
}

/// [`Transport`] over a `rumqttc` client and its event loop.
#[derive(Default)]
pub struct MqttTransport {
    session: Option<Session>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self, target: &BrokerTarget, link: LinkState) {
        if self.session.is_some() {
            return;
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options(target), REQUEST_CHANNEL_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            eventloop,
            link,
            Backoff::default(),
            stop_rx,
            target.to_string(),
        ));

        self.session = Some(Session {
            client,
            stop,
            driver,
        });
    }

    fn publish(&mut self, topic: String, payload: Vec<u8>) -> Result<(), PublishError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PublishError::Client("no session".into()))?;
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(session) = self.session.take() else {
                return;
            };

            if let Err(e) = session.client.try_disconnect() {
                debug!("Could not queue MQTT disconnect: {e}");
            }
            let _ = session.stop.send(());

            let mut driver = session.driver;
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver)
                .await
                .is_err()
            {
                debug!("MQTT driver did not finish within {DISCONNECT_GRACE:?}; aborting");
                driver.abort();
            }
        })
    }
}

/// Map an event-loop error to the connection event it represents.
fn failure_event(err: &ConnectionError) -> TransportEvent {
    match err {
        ConnectionError::ConnectionRefused(code) => TransportEvent::Rejected(format!("{code:?}")),
        other => TransportEvent::Closed(other.to_string()),
    }
}

/// Remove publishes the event loop kept for replay after a connection error.
///
/// Returns how many were removed.
fn discard_unsent_publishes(pending: &mut VecDeque<Request>) -> usize {
    let before = pending.len();
    pending.retain(|request| !matches!(request, Request::Publish(_)));
    before - pending.len()
}

async fn drive(
    mut eventloop: EventLoop,
    link: LinkState,
    mut backoff: Backoff,
    mut stop: oneshot::Receiver<()>,
    broker: String,
) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                flush_disconnect(&mut eventloop).await;
                break;
            }
            event = eventloop.poll() => match event {
                // Refused handshakes surface as ConnectionError::ConnectionRefused
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    link.apply(&TransportEvent::Accepted);
                    backoff.reset();
                    info!("Connected to MQTT broker {broker}");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    link.apply(&TransportEvent::Closed("disconnect requested".into()));
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    let event = failure_event(&err);
                    link.apply(&event);
                    match event {
                        TransportEvent::Rejected(code) => {
                            warn!("MQTT broker {broker} rejected connection: {code}");
                        }
                        _ => warn!("MQTT connection to {broker} lost: {err}"),
                    }

                    // Delivery is at most once: nothing queued before the
                    // failure may go out after the reconnect
                    let discarded = discard_unsent_publishes(&mut eventloop.pending);
                    if discarded > 0 {
                        warn!("Dropped {discarded} unsent readings for {broker}");
                    }

                    let delay = backoff.next_delay();
                    info!("Reconnecting to MQTT broker {broker} in {delay:?}");
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    link.apply(&TransportEvent::ConnectRequested);
                }
            }
        }
    }
    debug!("MQTT driver for {broker} stopped");
}

/// Poll until the queued DISCONNECT has been written or the connection fails.
async fn flush_disconnect(eventloop: &mut EventLoop) {
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
        debug!("Timed out flushing MQTT disconnect");
    }
}
