//! Error types for queuerator
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.

use std::fmt;
use thiserror::Error;

/// Result type alias for queuerator operations
pub type Result<T> = std::result::Result<T, QueueratorError>;

/// Primary error type for all queuerator operations
#[derive(Error, Debug)]
pub enum QueueratorError {
    /// Invalid source configuration (empty topics, bad endpoint, ...)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed criteria expression, detected while building the tree
    #[error("Criteria error: {message}")]
    Criteria { message: String },

    /// Message payload could not be decoded into a record
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Broker rejected or failed a topic subscription
    #[error("Subscription to \"{topic}\" failed: {message}")]
    Subscription {
        topic: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport connection or I/O errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Retry limit exceeded
    #[error("Retry exhausted after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },

    /// Transport dropped its event and message channels while the session was live
    #[error("Transport channels closed")]
    ChannelClosed,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueratorError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a criteria construction error
    pub fn criteria(message: impl Into<String>) -> Self {
        Self::Criteria {
            message: message.into(),
        }
    }

    /// Create a decode error with source
    pub fn decode_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Create a subscription error
    pub fn subscription(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            topic: topic.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a subscription error with source
    pub fn subscription_with_source(
        topic: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Subscription {
            topic: topic.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }
}

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: String,
    pub topic: Option<String>,
    pub client_id: Option<String>,
    pub sequence: Option<u64>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            topic: None,
            client_id: None,
            sequence: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}]", self.component, self.operation)?;
        if let Some(ref topic) = self.topic {
            write!(f, " topic={}", topic)?;
        }
        if let Some(ref id) = self.client_id {
            write!(f, " client_id={}", id)?;
        }
        if let Some(seq) = self.sequence {
            write!(f, " seq={}", seq)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContextExt<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T>;
}

impl<T> ErrorContextExt<T> for Result<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            tracing::error!(
                error = %e,
                component = ctx.component,
                operation = %ctx.operation,
                topic = ?ctx.topic,
                client_id = ?ctx.client_id,
                sequence = ?ctx.sequence,
                "Operation failed"
            );
            e
        })
    }
}
