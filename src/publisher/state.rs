//! Broker connection state shared between the publisher and its transport.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state of the publisher's broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Connection lifecycle notifications reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A (re)connection attempt is starting.
    ConnectRequested,
    /// The broker accepted the handshake.
    Accepted,
    /// The broker refused the handshake.
    Rejected(String),
    /// The transport lost or closed the connection.
    Closed(String),
}

/// Thread-safe handle to a [`ConnectionState`].
///
/// Cloned into the transport's driver so that broker acknowledgements and
/// disconnects can update the state the publisher reads before each publish.
#[derive(Debug, Clone, Default)]
pub struct LinkState(Arc<AtomicU8>);

impl LinkState {
    /// Current connection state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Apply a transport event and return the resulting state.
    pub fn apply(&self, event: &TransportEvent) -> ConnectionState {
        let next = match event {
            TransportEvent::ConnectRequested => ConnectionState::Connecting,
            TransportEvent::Accepted => ConnectionState::Connected,
            TransportEvent::Rejected(_) | TransportEvent::Closed(_) => {
                ConnectionState::Disconnected
            }
        };
        self.0.store(next as u8, Ordering::Release);
        next
    }

    pub(crate) fn reset(&self) {
        self.0
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
    }
}
