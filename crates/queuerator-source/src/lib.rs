//! # Queuerator Source
//!
//! Broker data source: connects to a message broker, keeps a set of topic
//! subscriptions alive across reconnects and evaluates every inbound
//! payload against a criteria tree.
//!
//! ## Components
//!
//! - [`ConnectionStateMachine`]: connection lifecycle and (re)subscription
//! - [`DataSourceSession`]: event loop, decode and evaluation
//! - [`NatsTransport`] / [`MemoryTransport`]: broker transports
//!
//! ## Usage
//!
//! ```bash
//! queuerator-source --url nats://broker:4222 --topics sensors.a,sensors.b \
//!     --criteria '{"field": "temp", "op": ">", "value": 30}'
//! ```

pub mod connection;
pub mod session;
pub mod transport;

pub use connection::*;
pub use session::*;
pub use transport::*;
