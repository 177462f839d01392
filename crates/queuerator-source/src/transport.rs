//! Broker transport strategies
//!
//! Implements [`Transport`] for:
//! - NatsTransport: async-nats core client
//! - MemoryTransport: in-process broker (for testing)

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use queuerator_core::prelude::*;
use queuerator_core::ReconnectConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

// ============================================================================
// NATS Transport
// ============================================================================

/// How long `subscribe` keeps listening for a permission error after its
/// flush completes. The server writes `-ERR` before the PONG, but the client
/// delivers it through the event callback task.
const DENIAL_WINDOW: Duration = Duration::from_millis(50);

/// Subject named by a subscription permission error
/// (`Permissions Violation for Subscription to "<subject>"`)
fn denied_subject(message: &str) -> Option<&str> {
    const MARKER: &str = "permissions violation for subscription to";
    // ASCII lowercasing keeps byte offsets valid for `message`
    let start = message.to_ascii_lowercase().find(MARKER)? + MARKER.len();
    let rest = &message[start..];
    let open = rest.find('"')? + 1;
    let len = rest[open..].find('"')?;
    Some(&rest[open..open + len])
}

/// Subscription denials reported by the server, keyed by subject
#[derive(Default)]
struct Denials {
    subjects: Mutex<HashMap<String, String>>,
    notify: Notify,
}

impl Denials {
    async fn record(&self, subject: &str, reason: String) {
        self.subjects.lock().await.insert(subject.to_string(), reason);
        self.notify.notify_waiters();
    }

    async fn clear(&self, subject: &str) {
        self.subjects.lock().await.remove(subject);
    }

    /// Wait until a denial for `subject` is recorded and take it
    async fn wait(&self, subject: &str) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(reason) = self.subjects.lock().await.remove(subject) {
                return reason;
            }
            notified.await;
        }
    }
}

/// Turns async-nats callbacks into one ordered stream of transport events.
///
/// Every dial after the first one of a session is reported as
/// `Connecting { attempt }` with a 1-based attempt count that restarts after
/// each successful connect. A dial following a failed one first reports
/// `ConnectionFailed`; the first dial after a drop reports `ConnectionLost`
/// unless the client's `Disconnected` event already did.
struct DialTracker {
    events: UnboundedSender<TransportEvent>,
    reconnect: ReconnectConfig,
    denials: Arc<Denials>,
    dials: AtomicU32,
    ever_connected: AtomicBool,
    lost_reported: AtomicBool,
}

impl DialTracker {
    fn new(
        events: UnboundedSender<TransportEvent>,
        reconnect: ReconnectConfig,
        denials: Arc<Denials>,
    ) -> Self {
        Self {
            events,
            reconnect,
            denials,
            dials: AtomicU32::new(0),
            ever_connected: AtomicBool::new(false),
            lost_reported: AtomicBool::new(false),
        }
    }

    /// Called before every dial; returns the delay to wait first
    fn on_dial(&self) -> Duration {
        let attempt = self.dials.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let is_reconnect = self.ever_connected.load(Ordering::SeqCst);

        if attempt == 1 && !is_reconnect {
            // already entered by the state machine's connect()
            return Duration::ZERO;
        }

        if attempt > 1 {
            self.send(TransportEvent::ConnectionFailed {
                reason: format!("dial attempt {} failed", attempt - 1),
            });
        } else {
            self.report_lost();
        }
        self.send(TransportEvent::Connecting {
            attempt,
            is_reconnect,
        });

        if attempt == 1 {
            Duration::ZERO
        } else {
            self.reconnect.delay(attempt - 1)
        }
    }

    async fn on_event(&self, event: async_nats::Event) {
        match event {
            async_nats::Event::Connected => {
                self.dials.store(0, Ordering::SeqCst);
                self.ever_connected.store(true, Ordering::SeqCst);
                self.lost_reported.store(false, Ordering::SeqCst);
                self.send(TransportEvent::Connected);
            }
            async_nats::Event::Disconnected => self.report_lost(),
            async_nats::Event::ServerError(e) => {
                let reason = e.to_string();
                if let Some(subject) = denied_subject(&reason) {
                    self.denials.record(subject, reason.clone()).await;
                }
                self.send(TransportEvent::BrokerFailed {
                    detail: "server".to_string(),
                    reason,
                });
            }
            async_nats::Event::ClientError(e) => self.send(TransportEvent::BrokerFailed {
                detail: "client".to_string(),
                reason: e.to_string(),
            }),
            other => self.send(TransportEvent::Broker {
                detail: format!("{:?}", other),
            }),
        }
    }

    fn report_lost(&self) {
        if self.ever_connected.load(Ordering::SeqCst)
            && !self.lost_reported.swap(true, Ordering::SeqCst)
        {
            self.send(TransportEvent::ConnectionLost {
                reason: "disconnected".to_string(),
            });
        }
    }

    fn send(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Event queue closed");
        }
    }
}

/// NATS transport
///
/// Connection progress comes from the client's reconnect delay and event
/// callbacks through a [`DialTracker`]. Each subscription gets a forwarding
/// task pushing payloads into the message queue.
pub struct NatsTransport {
    client: RwLock<Option<async_nats::Client>>,
    messages: RwLock<Option<UnboundedSender<Bytes>>>,
    denials: Arc<Denials>,
    subscribed: Mutex<HashSet<String>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsTransport {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            messages: RwLock::new(None),
            denials: Arc::new(Denials::default()),
            subscribed: Mutex::new(HashSet::new()),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    async fn client(&self) -> Result<async_nats::Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| QueueratorError::transport("Client not initialized"))
    }
}

impl Default for NatsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self, request: &ConnectRequest, channels: TransportChannels) -> Result<()> {
        info!(url = %request.url, client_id = %request.client_id, "Connecting to NATS");

        let tracker = Arc::new(DialTracker::new(
            channels.events,
            request.reconnect.clone(),
            self.denials.clone(),
        ));
        let dial = tracker.clone();

        let client = async_nats::ConnectOptions::new()
            .name(&request.client_id)
            .retry_on_initial_connect()
            .reconnect_delay_callback(move |_attempts| dial.on_dial())
            .event_callback(move |event| {
                let tracker = tracker.clone();
                async move { tracker.on_event(event).await }
            })
            .connect(request.url.as_str())
            .await
            .map_err(|e| QueueratorError::transport_with_source("Failed to connect", e))?;

        *self.messages.write().await = Some(channels.messages);
        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let client = self.client().await?;

        if self.subscribed.lock().await.contains(topic) {
            trace!(topic, "Already subscribed");
            return Ok(());
        }

        self.denials.clear(topic).await;
        let mut subscriber = client.subscribe(topic.to_string()).await.map_err(|e| {
            QueueratorError::subscription_with_source(topic, "subscribe rejected", e)
        })?;

        // the server processes protocol lines in order, so the PONG that
        // completes this flush follows any -ERR for the SUB
        client.flush().await.map_err(|e| {
            QueueratorError::subscription_with_source(topic, "no acknowledgement", e)
        })?;

        if let Ok(reason) = tokio::time::timeout(DENIAL_WINDOW, self.denials.wait(topic)).await {
            return Err(QueueratorError::subscription(topic, reason));
        }

        let messages = self
            .messages
            .read()
            .await
            .clone()
            .ok_or_else(|| QueueratorError::transport("Message queue not initialized"))?;

        let subject = topic.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                if messages.send(msg.payload).is_err() {
                    break;
                }
            }
            debug!(topic = %subject, "Subscription forwarder finished");
        });

        self.forwarders.lock().await.push(forwarder);
        self.subscribed.lock().await.insert(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) -> Result<()> {
        let client = self.client.write().await.take();

        if let Some(ref client) = client {
            match tokio::time::timeout(grace, client.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Flush failed during disconnect"),
                Err(_) => warn!("Flush did not finish within grace period"),
            }
        }

        for forwarder in self.forwarders.lock().await.drain(..) {
            forwarder.abort();
        }
        self.subscribed.lock().await.clear();
        *self.messages.write().await = None;
        drop(client);

        info!("NATS transport disconnected");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

// ============================================================================
// Memory Transport (for testing)
// ============================================================================

#[derive(Default)]
struct BrokerState {
    channels: Option<TransportChannels>,
    manual_connect: bool,
    connect_error: Option<String>,
    subscriptions: Vec<String>,
    attempts: Vec<String>,
    failing: HashMap<String, u32>,
    stalled: HashSet<String>,
    stall_disconnect: bool,
    disconnects: u32,
}

/// In-process transport driven through a [`MemoryBroker`]
pub struct MemoryTransport {
    state: Arc<Mutex<BrokerState>>,
}

/// Test handle for a [`MemoryTransport`]
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryTransport {
    /// Create a transport and the handle that controls it
    pub fn new() -> (Self, MemoryBroker) {
        let state = Arc::new(Mutex::new(BrokerState::default()));
        (
            Self {
                state: state.clone(),
            },
            MemoryBroker { state },
        )
    }
}

impl MemoryBroker {
    /// Deliver a payload, as if published on a subscribed topic.
    ///
    /// Returns false when no session is attached.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> bool {
        let state = self.state.lock().await;
        match state.channels {
            Some(ref channels) => channels.messages.send(payload.into()).is_ok(),
            None => false,
        }
    }

    /// Report a connection event
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let state = self.state.lock().await;
        match state.channels {
            Some(ref channels) => channels.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Don't report `Connected` from `connect()`; tests emit it themselves
    pub async fn manual_connect(&self) {
        self.state.lock().await.manual_connect = true;
    }

    /// Make `connect()` fail
    pub async fn fail_connect(&self, reason: impl Into<String>) {
        self.state.lock().await.connect_error = Some(reason.into());
    }

    /// Reject the next `times` subscribe requests for `topic`
    pub async fn fail_subscription(&self, topic: impl Into<String>, times: u32) {
        self.state.lock().await.failing.insert(topic.into(), times);
    }

    /// Never acknowledge subscribe requests for `topic`
    pub async fn stall_subscription(&self, topic: impl Into<String>) {
        self.state.lock().await.stalled.insert(topic.into());
    }

    /// Never complete `disconnect()`
    pub async fn stall_disconnect(&self) {
        self.state.lock().await.stall_disconnect = true;
    }

    /// Drop both queues, as a transport that died would
    pub async fn close(&self) {
        self.state.lock().await.channels = None;
    }

    /// Acknowledged subscriptions, in order
    pub async fn subscriptions(&self) -> Vec<String> {
        self.state.lock().await.subscriptions.clone()
    }

    /// Every subscribe request received, in order
    pub async fn subscribe_attempts(&self) -> Vec<String> {
        self.state.lock().await.attempts.clone()
    }

    pub async fn disconnects(&self) -> u32 {
        self.state.lock().await.disconnects
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, request: &ConnectRequest, channels: TransportChannels) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(ref reason) = state.connect_error {
            return Err(QueueratorError::transport(format!(
                "Failed to connect to {}: {}",
                request.url, reason
            )));
        }

        if !state.manual_connect {
            let _ = channels.events.send(TransportEvent::Connected);
        }
        state.channels = Some(channels);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let stalled = {
            let mut state = self.state.lock().await;
            state.attempts.push(topic.to_string());

            if let Some(remaining) = state.failing.get_mut(topic) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(QueueratorError::subscription(topic, "not authorized"));
                }
            }

            if !state.stalled.contains(topic) && !state.subscriptions.iter().any(|t| t == topic) {
                state.subscriptions.push(topic.to_string());
            }
            state.stalled.contains(topic)
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> Result<()> {
        let stall = {
            let mut state = self.state.lock().await;
            state.disconnects += 1;
            state.channels = None;
            state.stall_disconnect
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use queuerator_core::channels;

    fn request() -> ConnectRequest {
        ConnectRequest {
            url: "memory://local".to_string(),
            client_id: "test".to_string(),
            reconnect: Default::default(),
        }
    }

    fn tracker() -> (DialTracker, tokio::sync::mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        };
        (
            DialTracker::new(tx, reconnect, Arc::new(Denials::default())),
            rx,
        )
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_dials_follow_transition_table() {
        let (tracker, mut rx) = tracker();

        // initial connect: dial 1 refused, dial 2 succeeds
        assert_eq!(tracker.on_dial(), Duration::ZERO);
        assert_eq!(tracker.on_dial(), Duration::from_millis(100));
        tracker.on_event(async_nats::Event::Connected).await;

        // drop, then two reconnect dials; Disconnected arrives late
        assert_eq!(tracker.on_dial(), Duration::ZERO);
        tracker.on_event(async_nats::Event::Disconnected).await;
        assert_eq!(tracker.on_dial(), Duration::from_millis(100));
        tracker.on_event(async_nats::Event::Connected).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                TransportEvent::ConnectionFailed {
                    reason: "dial attempt 1 failed".into()
                },
                TransportEvent::Connecting {
                    attempt: 2,
                    is_reconnect: false
                },
                TransportEvent::Connected,
                TransportEvent::ConnectionLost {
                    reason: "disconnected".into()
                },
                TransportEvent::Connecting {
                    attempt: 1,
                    is_reconnect: true
                },
                TransportEvent::ConnectionFailed {
                    reason: "dial attempt 1 failed".into()
                },
                TransportEvent::Connecting {
                    attempt: 2,
                    is_reconnect: true
                },
                TransportEvent::Connected,
            ]
        );

        let mut state = ConnectionState::Connecting {
            attempt: 1,
            is_reconnect: false,
        };
        for event in &events {
            state = state
                .transition(event)
                .unwrap_or_else(|| panic!("{} --{}--> rejected", state, event));
        }
        assert!(state.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_reported_once() {
        let (tracker, mut rx) = tracker();
        tracker.on_dial();
        tracker.on_event(async_nats::Event::Connected).await;
        tracker.on_event(async_nats::Event::Disconnected).await;
        tracker.on_dial();

        let lost = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TransportEvent::ConnectionLost { .. }))
            .count();
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_other_client_events_are_informational() {
        let (tracker, mut rx) = tracker();
        tracker.on_event(async_nats::Event::LameDuckMode).await;
        tracker.on_event(async_nats::Event::Disconnected).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_informational());
    }

    #[test]
    fn test_denied_subject() {
        assert_eq!(
            denied_subject("Permissions Violation for Subscription to \"sensors.secret\""),
            Some("sensors.secret")
        );
        let queued = "nats: permissions violation for subscription to \"a.>\" using queue \"q\"";
        assert_eq!(denied_subject(queued), Some("a.>"));
        assert_eq!(
            denied_subject("Permissions Violation for Publish to \"a.1\""),
            None
        );
        assert_eq!(denied_subject("Authorization Violation"), None);
    }

    #[tokio::test]
    async fn test_denial_reaches_waiting_subscribe() {
        let denials = Arc::new(Denials::default());
        let waiter = {
            let denials = denials.clone();
            tokio::spawn(async move { denials.wait("a.1").await })
        };
        tokio::task::yield_now().await;

        denials.record("a.2", "other topic".into()).await;
        denials.record("a.1", "not permitted".into()).await;
        assert_eq!(waiter.await.unwrap(), "not permitted");

        denials.clear("a.2").await;
        let pending = tokio::time::timeout(Duration::from_millis(20), denials.wait("a.2")).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_memory_transport() {
        let (transport, broker) = MemoryTransport::new();
        assert!(!broker.publish(&b"{}"[..]).await);

        let (tx, mut rx) = channels();
        transport.connect(&request(), tx).await.unwrap();
        assert_eq!(rx.events.recv().await, Some(TransportEvent::Connected));

        transport.subscribe("a.1").await.unwrap();
        transport.subscribe("a.1").await.unwrap();
        assert_eq!(broker.subscriptions().await, vec!["a.1"]);
        assert_eq!(broker.subscribe_attempts().await, vec!["a.1", "a.1"]);

        assert!(broker.publish(&b"{\"temp\":1}"[..]).await);
        assert_eq!(rx.messages.recv().await.unwrap(), Bytes::from_static(b"{\"temp\":1}"));

        transport.disconnect(Duration::from_millis(10)).await.unwrap();
        assert_eq!(broker.disconnects().await, 1);
        assert!(rx.messages.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_subscription_failures() {
        let (transport, broker) = MemoryTransport::new();
        broker.fail_subscription("a.1", 1).await;
        let (tx, _rx) = channels();
        transport.connect(&request(), tx).await.unwrap();

        assert!(transport.subscribe("a.1").await.is_err());
        assert!(transport.subscribe("a.1").await.is_ok());
        assert_eq!(broker.subscriptions().await, vec!["a.1"]);
    }
}
