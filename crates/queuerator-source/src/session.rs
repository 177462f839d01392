//! Data source session
//!
//! Owns the connection state machine and the single loop that consumes the
//! transport's event and message queues. Each payload is decoded, evaluated
//! against the configured criteria and logged in arrival order.

use crate::connection::{ConnectionState, ConnectionStateMachine};
use queuerator_core::prelude::*;
use queuerator_core::{channels, ErrorContext, LatencyTimer, SessionMetrics};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Result of evaluating one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Matched,
    Unmatched,
    Undecodable { reason: String },
}

/// Per-message outcome, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// 1-based arrival index within the session
    pub sequence: u64,
    pub verdict: Verdict,
}

/// Session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub decode_errors: u64,
    pub matched: u64,
    pub unmatched: u64,
}

/// Broker data source session
pub struct DataSourceSession {
    source: ValidatedSource,
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<ConnectionState>>,
    results: Option<mpsc::UnboundedSender<MatchOutcome>>,
    span: Span,
    metrics: SessionMetrics,
    received: AtomicU64,
    decode_errors: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
}

impl DataSourceSession {
    /// Create a session over `transport`
    pub fn new(source: ValidatedSource, transport: Arc<dyn Transport>) -> Self {
        let span = info_span!(
            "data_source",
            client_id = %source.client_id,
            url = %source.url,
            transport = transport.name()
        );
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            metrics: SessionMetrics::new(source.client_id.clone()),
            source,
            transport,
            state: Arc::new(state),
            results: None,
            span,
            received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
        }
    }

    /// Log under `span` instead of the default `data_source` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Also report every outcome on `results`
    pub fn with_results(mut self, results: mpsc::UnboundedSender<MatchOutcome>) -> Self {
        self.results = Some(results);
        self
    }

    /// Observe connection state changes
    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }

    /// Run until `cancel` fires or a fatal error occurs.
    ///
    /// The transport is disconnected within the configured grace period on
    /// every exit path.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SessionStats> {
        let span = self.span.clone();
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<SessionStats> {
        info!(
            url = %self.source.url,
            topics = ?self.source.topics,
            criteria = %self.source.criteria,
            subscription_policy = self.source.subscription_policy.as_str(),
            "Starting data source session"
        );

        let grace = self.source.disconnect_grace;
        let (tx, mut queues) = channels();
        let mut machine = ConnectionStateMachine::with_state(
            self.transport.clone(),
            &self.source,
            self.state.clone(),
        );

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = machine.connect(tx) => Some(result),
        };
        match connected {
            None => {
                info!("Cancelled while connecting");
                machine.terminate(grace).await;
                return Ok(self.stats());
            }
            Some(Err(e)) => {
                machine.terminate(grace).await;
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let mut sequence = 0u64;
        let mut events_open = true;
        let mut messages_open = true;

        let outcome = loop {
            if !events_open && !messages_open {
                break Err(QueueratorError::ChannelClosed);
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Cancellation requested");
                    break Ok(());
                }

                event = queues.events.recv(), if events_open => match event {
                    Some(event) => {
                        // subscribing can wait on the broker; keep it cancellable
                        let handled = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            result = machine.handle(event) => Some(result),
                        };
                        match handled {
                            None => {
                                info!("Cancellation requested");
                                break Ok(());
                            }
                            Some(Err(e)) => break Err(e),
                            Some(Ok(())) => {}
                        }
                    }
                    None => events_open = false,
                },

                payload = queues.messages.recv(), if messages_open => match payload {
                    Some(payload) => {
                        sequence += 1;
                        self.process(sequence, &payload);
                    }
                    None => messages_open = false,
                },
            }
        };

        machine.terminate(grace).await;

        let stats = self.stats();
        match outcome {
            Ok(()) => {
                info!(?stats, connection = ?machine.stats(), "Data source session stopped");
                Ok(stats)
            }
            Err(e) => {
                let context =
                    ErrorContext::new("session", "run").with_client_id(&self.source.client_id);
                error!(
                    error = %e,
                    context = %context,
                    ?stats,
                    "Data source session failed"
                );
                Err(e)
            }
        }
    }

    /// Decode, evaluate and report one payload
    fn process(&self, sequence: u64, payload: &[u8]) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_received();

        let verdict = match decode(payload) {
            Ok(record) => {
                let timer = LatencyTimer::start(|d| self.metrics.record_evaluate_latency(d));
                let matched = self.source.criteria.evaluate(&record);
                timer.stop();

                self.metrics.record_result(matched);
                if matched {
                    self.matched.fetch_add(1, Ordering::Relaxed);
                    Verdict::Matched
                } else {
                    self.unmatched.fetch_add(1, Ordering::Relaxed);
                    Verdict::Unmatched
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    context = %ErrorContext::new("session", "decode").with_sequence(sequence),
                    bytes = payload.len(),
                    "Skipping undecodable message"
                );
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_decode_error();
                Verdict::Undecodable {
                    reason: e.to_string(),
                }
            }
        };

        if !matches!(verdict, Verdict::Undecodable { .. }) {
            info!(sequence, matched = verdict == Verdict::Matched, "Message evaluated");
        }

        if let Some(ref results) = self.results {
            let _ = results.send(MatchOutcome { sequence, verdict });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    fn source() -> ValidatedSource {
        let config: SourceConfig = serde_json::from_value(json!({
            "clientId": "unit",
            "topics": ["a.1"],
            "criteria": {"field": "temp", "op": ">", "value": 30}
        }))
        .unwrap();
        config.validate().unwrap()
    }

    #[test]
    fn test_process_counts_and_reports() {
        let (transport, _broker) = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = DataSourceSession::new(source(), Arc::new(transport)).with_results(tx);

        session.process(1, br#"{"temp": 35}"#);
        session.process(2, br#"{"temp": 20}"#);
        session.process(3, b"not json");
        session.process(4, br#"{"humidity": 1}"#);

        assert_eq!(
            session.stats(),
            SessionStats {
                received: 4,
                decode_errors: 1,
                matched: 1,
                unmatched: 2,
            }
        );

        assert_eq!(rx.try_recv().unwrap().verdict, Verdict::Matched);
        assert_eq!(rx.try_recv().unwrap().verdict, Verdict::Unmatched);
        let undecodable = rx.try_recv().unwrap();
        assert_eq!(undecodable.sequence, 3);
        assert!(matches!(undecodable.verdict, Verdict::Undecodable { .. }));
        assert_eq!(rx.try_recv().unwrap().verdict, Verdict::Unmatched);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (transport, broker) = MemoryTransport::new();
        let session = DataSourceSession::new(source(), Arc::new(transport));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = session.run(cancel).await.unwrap();
        assert_eq!(stats, SessionStats::default());
        assert!(session.states().borrow().is_terminated());
        assert_eq!(broker.disconnects().await, 1);
    }
}
