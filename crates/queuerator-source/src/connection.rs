//! Connection lifecycle
//!
//! Tracks one logical broker session through its states and re-issues the
//! configured subscriptions every time it (re)enters `Connected`.
//!
//! ```text
//! Idle ──connect()──► Connecting ──success──► Connected
//!                        ▲   │                   │
//!              (retry)   │   └─failure─► ConnectionFailed
//!                        │                       │ network drop
//!                        └──(retry)── ConnectionLost ◄┘
//!
//! any live state ──cancel()──► Terminated
//! ```
//!
//! Reconnection itself belongs to the transport's backoff policy; the state
//! machine only observes it through [`TransportEvent`]s.

use chrono::{SecondsFormat, Utc};
use queuerator_core::prelude::*;
use queuerator_core::{ConnectionMetrics, ErrorContext, ErrorContextExt, RetryConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Logical state of the broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { attempt: u32, is_reconnect: bool },
    Connected,
    ConnectionFailed { reason: String },
    ConnectionLost { reason: String },
    Terminated,
}

impl ConnectionState {
    /// State reached by applying `event`, or `None` if the event does not
    /// change the state.
    ///
    /// Only these edges exist:
    ///
    /// | from | event | to |
    /// |---|---|---|
    /// | Idle, Connecting, ConnectionFailed, ConnectionLost | Connecting | Connecting |
    /// | Connecting | Connected | Connected |
    /// | Connecting | ConnectionFailed | ConnectionFailed |
    /// | Connected | ConnectionLost | ConnectionLost |
    ///
    /// Informational events and anything after `Terminated` yield `None`.
    pub fn transition(&self, event: &TransportEvent) -> Option<ConnectionState> {
        match (self, event) {
            (Self::Terminated, _) | (Self::Connected, TransportEvent::Connecting { .. }) => None,
            (
                _,
                TransportEvent::Connecting {
                    attempt,
                    is_reconnect,
                },
            ) => Some(Self::Connecting {
                attempt: *attempt,
                is_reconnect: *is_reconnect,
            }),
            (Self::Connecting { .. }, TransportEvent::Connected) => Some(Self::Connected),
            (Self::Connecting { .. }, TransportEvent::ConnectionFailed { reason }) => {
                Some(Self::ConnectionFailed {
                    reason: reason.clone(),
                })
            }
            (Self::Connected, TransportEvent::ConnectionLost { reason }) => {
                Some(Self::ConnectionLost {
                    reason: reason.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting {
                attempt,
                is_reconnect,
            } => write!(f, "connecting (is_reconnect={}) [{}]", is_reconnect, attempt),
            Self::ConnectionFailed { reason } => write!(f, "connection failed: {}", reason),
            Self::ConnectionLost { reason } => write!(f, "connection lost: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub transitions: u64,
    pub connects: u64,
    pub reconnect_attempts: u64,
}

/// Drives one broker session and its subscriptions
pub struct ConnectionStateMachine {
    transport: Arc<dyn Transport>,
    request: ConnectRequest,
    topics: Vec<String>,
    policy: SubscriptionPolicy,
    subscribe_timeout: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    started: Instant,
    metrics: ConnectionMetrics,
    stats: ConnectionStats,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Idle` state
    pub fn new(transport: Arc<dyn Transport>, source: &ValidatedSource) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self::with_state(transport, source, Arc::new(state))
    }

    /// Create a machine publishing into an existing state channel
    pub fn with_state(
        transport: Arc<dyn Transport>,
        source: &ValidatedSource,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        state.send_replace(ConnectionState::Idle);
        Self {
            transport,
            request: ConnectRequest {
                url: source.url.to_string(),
                client_id: source.client_id.clone(),
                reconnect: source.reconnect.clone(),
            },
            topics: source.topics.clone(),
            policy: source.subscription_policy.clone(),
            subscribe_timeout: source.subscribe_timeout,
            state,
            started: Instant::now(),
            metrics: ConnectionMetrics::new(source.client_id.clone()),
            stats: ConnectionStats::default(),
        }
    }

    /// Observe state changes
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Leave `Idle` and hand the channels to the transport
    pub async fn connect(&mut self, channels: TransportChannels) -> Result<()> {
        if self.state() != ConnectionState::Idle {
            return Err(QueueratorError::Internal(format!(
                "connect() called in state {}",
                self.state()
            )));
        }

        self.enter(ConnectionState::Connecting {
            attempt: 1,
            is_reconnect: false,
        });

        let result = self
            .transport
            .connect(&self.request, channels)
            .await
            .with_context(
                ErrorContext::new("connection", "connect").with_client_id(&self.request.client_id),
            );

        if let Err(ref e) = result {
            self.enter(ConnectionState::ConnectionFailed {
                reason: e.to_string(),
            });
        }
        result
    }

    /// Apply one transport event.
    ///
    /// Entering `Connected` subscribes every configured topic before this
    /// returns. A subscription failure is returned per the configured policy.
    pub async fn handle(&mut self, event: TransportEvent) -> Result<()> {
        let current = self.state();
        match current.transition(&event) {
            Some(next) => {
                let connected = next.is_connected();
                self.enter(next);
                if connected {
                    self.subscribe_all().await?;
                }
            }
            None if event.is_informational() => {
                info!(
                    state = current.name(),
                    elapsed_us = self.elapsed_us(),
                    "[NOTIFICATION] {}",
                    event
                );
            }
            None => {
                debug!(state = current.name(), %event, "Ignoring event with no transition");
            }
        }
        Ok(())
    }

    /// Disconnect within `grace` and enter `Terminated`
    pub async fn terminate(&mut self, grace: Duration) {
        if self.state().is_terminated() {
            return;
        }

        match tokio::time::timeout(grace, self.transport.disconnect(grace)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Disconnect failed"),
            Err(_) => warn!(
                grace_ms = grace.as_millis() as u64,
                "Disconnect did not finish within grace period"
            ),
        }

        self.enter(ConnectionState::Terminated);
    }

    /// Subscribe every topic in configured order, one acknowledgement at a time
    async fn subscribe_all(&mut self) -> Result<()> {
        let topics = self.topics.clone();
        for topic in &topics {
            match self.policy.clone() {
                SubscriptionPolicy::Abort => self.subscribe_once(topic).await?,
                SubscriptionPolicy::Skip => {
                    if let Err(e) = self.subscribe_once(topic).await {
                        warn!(topic = %topic, error = %e, "Skipping failed subscription");
                    }
                }
                SubscriptionPolicy::Retry(retry) => self.subscribe_with_retry(topic, &retry).await?,
            }
        }
        Ok(())
    }

    async fn subscribe_with_retry(&mut self, topic: &str, retry: &RetryConfig) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.subscribe_once(topic).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retry.max_attempts => {
                    let delay = retry.delay(attempt);
                    warn!(
                        topic = %topic,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying subscription"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(QueueratorError::RetryExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    async fn subscribe_once(&mut self, topic: &str) -> Result<()> {
        let subscribe = self.transport.subscribe(topic);
        let result = match tokio::time::timeout(self.subscribe_timeout, subscribe).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ QueueratorError::Subscription { .. })) => Err(e),
            Ok(Err(e)) => Err(QueueratorError::subscription_with_source(
                topic,
                "transport error",
                e,
            )),
            Err(_) => Err(QueueratorError::subscription_with_source(
                topic,
                "no acknowledgement",
                QueueratorError::timeout("subscribe", self.subscribe_timeout.as_millis() as u64),
            )),
        };

        self.metrics.record_subscription(topic, result.is_ok());
        match result {
            Ok(()) => {
                info!(topic = %topic, "subscribed to topic \"{}\"", topic);
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    context = %ErrorContext::new("connection", "subscribe").with_topic(topic),
                    "failed to subscribe to topic \"{}\"",
                    topic
                );
                Err(e)
            }
        }
    }

    fn elapsed_us(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }

    fn enter(&mut self, next: ConnectionState) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let elapsed_us = self.elapsed_us();

        match &next {
            ConnectionState::Connecting {
                attempt,
                is_reconnect,
            } => {
                if *is_reconnect {
                    self.stats.reconnect_attempts += 1;
                    self.metrics.record_reconnect();
                }
                info!(
                    %timestamp,
                    elapsed_us,
                    state = next.name(),
                    attempt,
                    is_reconnect,
                    "[NOTIFICATION] {}",
                    next
                );
            }
            ConnectionState::ConnectionFailed { reason }
            | ConnectionState::ConnectionLost { reason } => {
                warn!(
                    %timestamp,
                    elapsed_us,
                    state = next.name(),
                    reason = %reason,
                    "[NOTIFICATION] {}",
                    next
                );
            }
            _ => {
                info!(%timestamp, elapsed_us, state = next.name(), "[NOTIFICATION] {}", next);
            }
        }

        if next.is_connected() {
            self.stats.connects += 1;
        }
        self.stats.transitions += 1;
        self.metrics.set_connected(next.is_connected());
        self.state.send_replace(next);
    }
}
