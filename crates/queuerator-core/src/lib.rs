//! # Queuerator Core
//!
//! Core types and traits for turning broker messages into match decisions.
//!
//! This crate holds everything that does not touch the network:
//! - Criteria expressions and their evaluation
//! - Record decoding
//! - Source configuration and validation
//! - The transport strategy trait and its event types
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  payload  ┌─────────┐  record  ┌──────────┐
//! │ Transport │──────────►│ decode  │─────────►│ Criteria │──► matched?
//! └───────────┘           └─────────┘          └──────────┘
//!       │ events
//!       ▼
//!  connection state machine (queuerator-source)
//! ```

pub mod config;
pub mod criteria;
pub mod error;
pub mod metrics;
pub mod record;
pub mod transport;

pub use self::config::*;
pub use self::criteria::*;
pub use self::error::*;
pub use self::metrics::{ConnectionMetrics, LatencyTimer, SessionMetrics};
pub use self::record::*;
pub use self::transport::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{AppConfig, SourceConfig, SubscriptionPolicy, ValidatedSource};
    pub use crate::criteria::{Criteria, CriteriaConfig, Predicate};
    pub use crate::error::{QueueratorError, Result};
    pub use crate::record::{decode, Record};
    pub use crate::transport::{
        ConnectRequest, Transport, TransportChannels, TransportEvent, TransportQueues,
    };
}
