//! Transport strategy
//!
//! The broker client is an external collaborator. This module defines the
//! seam the session drives it through, plus the typed events it reports.
//!
//! ```text
//!   Transport ──events──►  ConnectionStateMachine
//!       │
//!       └────payloads──►  message queue ──► decode ──► evaluate
//! ```
//!
//! Both directions are unbounded ordered channels. Callbacks registered with
//! the underlying client only ever push into them; all state handling happens
//! in the single loop that consumes them.

use crate::config::ReconnectConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Connection notification reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A (re)connect attempt has started
    Connecting { attempt: u32, is_reconnect: bool },
    /// Session established
    Connected,
    /// A connect attempt failed
    ConnectionFailed { reason: String },
    /// An established session dropped
    ConnectionLost { reason: String },
    /// Informational: a specific broker endpoint was selected
    Broker { detail: String },
    /// Informational: a specific broker endpoint failed
    BrokerFailed { detail: String, reason: String },
}

impl TransportEvent {
    /// Event that only annotates the current state
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Broker { .. } | Self::BrokerFailed { .. })
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting {
                attempt,
                is_reconnect,
            } => write!(f, "connecting (is_reconnect={}) [{}]", is_reconnect, attempt),
            Self::Connected => f.write_str("connected"),
            Self::ConnectionFailed { reason } => write!(f, "connection failed: {}", reason),
            Self::ConnectionLost { reason } => write!(f, "connection lost: {}", reason),
            Self::Broker { detail } => write!(f, "broker connection: {}", detail),
            Self::BrokerFailed { detail, reason } => {
                write!(f, "broker connection failed: {} [{}]", reason, detail)
            }
        }
    }
}

/// Parameters for establishing a session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub client_id: String,
    pub reconnect: ReconnectConfig,
}

/// Producer half of the event and message queues, handed to the transport
#[derive(Debug, Clone)]
pub struct TransportChannels {
    pub events: UnboundedSender<TransportEvent>,
    pub messages: UnboundedSender<Bytes>,
}

/// Consumer half of the event and message queues, owned by the session
#[derive(Debug)]
pub struct TransportQueues {
    pub events: UnboundedReceiver<TransportEvent>,
    pub messages: UnboundedReceiver<Bytes>,
}

/// Create the paired event and message queues
pub fn channels() -> (TransportChannels, TransportQueues) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    (
        TransportChannels {
            events: event_tx,
            messages: message_tx,
        },
        TransportQueues {
            events: event_rx,
            messages: message_rx,
        },
    )
}

/// Broker transport strategy
///
/// Implementations:
/// - `NatsTransport`: async-nats client
/// - `MemoryTransport`: direct in-memory channels (for testing)
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting.
    ///
    /// Returns once the client is created. Connection progress, including
    /// reconnection under the transport's own backoff policy, is reported
    /// through `channels.events`; inbound payloads go to `channels.messages`.
    async fn connect(&self, request: &ConnectRequest, channels: TransportChannels) -> Result<()>;

    /// Subscribe to a topic filter and wait for the broker's acknowledgement.
    ///
    /// Subscribing to a filter that is already held is not an error.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Disconnect, allowing up to `grace` for in-flight work to finish
    async fn disconnect(&self, grace: Duration) -> Result<()>;

    /// Get transport name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = TransportEvent::Connecting {
            attempt: 3,
            is_reconnect: true,
        };
        assert_eq!(event.to_string(), "connecting (is_reconnect=true) [3]");
        assert!(!event.is_informational());
        assert!(TransportEvent::Broker {
            detail: "nats://a:4222".into()
        }
        .is_informational());
    }

    #[tokio::test]
    async fn test_channels_preserve_order() {
        let (tx, mut rx) = channels();
        tx.messages.send(Bytes::from_static(b"1")).unwrap();
        tx.messages.send(Bytes::from_static(b"2")).unwrap();
        tx.events.send(TransportEvent::Connected).unwrap();

        assert_eq!(rx.messages.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx.messages.recv().await.unwrap(), Bytes::from_static(b"2"));
        assert_eq!(rx.events.recv().await.unwrap(), TransportEvent::Connected);
    }
}
