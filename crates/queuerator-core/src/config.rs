//! Configuration types for queuerator
//!
//! Uses the `config` crate for layered configuration from files and environment.

use crate::criteria::{Criteria, CriteriaConfig};
use crate::error::{QueueratorError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Data Source Configuration
// ============================================================================

/// Broker data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Broker endpoint URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Client identifier presented to the broker
    #[serde(default = "default_client_id", alias = "clientid")]
    pub client_id: String,

    /// Topic filters, subscribed in order on every connect
    #[serde(default)]
    pub topics: Vec<String>,

    /// Criteria every decoded message is evaluated against.
    ///
    /// Omitted from the serialized defaults layer.
    #[serde(default, skip_serializing)]
    pub criteria: CriteriaConfig,

    /// What to do when a subscription fails
    #[serde(default, alias = "subscriptionpolicy")]
    pub subscription_policy: SubscriptionPolicy,

    /// Bound on waiting for one subscription acknowledgement
    #[serde(
        with = "humantime_serde",
        default = "default_subscribe_timeout",
        alias = "subscribetimeout"
    )]
    pub subscribe_timeout: Duration,

    /// Grace period for disconnecting on cancellation
    #[serde(
        with = "humantime_serde",
        default = "default_disconnect_grace",
        alias = "disconnectgrace"
    )]
    pub disconnect_grace: Duration,

    /// Transport reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_client_id() -> String {
    "queuerator".to_string()
}

fn default_subscribe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_disconnect_grace() -> Duration {
    Duration::from_millis(250)
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            client_id: default_client_id(),
            topics: Vec::new(),
            criteria: CriteriaConfig::default(),
            subscription_policy: SubscriptionPolicy::default(),
            subscribe_timeout: default_subscribe_timeout(),
            disconnect_grace: default_disconnect_grace(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Source configuration that passed construction-time validation.
///
/// Immutable for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct ValidatedSource {
    pub url: Url,
    pub client_id: String,
    pub topics: Vec<String>,
    pub criteria: Arc<Criteria>,
    pub subscription_policy: SubscriptionPolicy,
    pub subscribe_timeout: Duration,
    pub disconnect_grace: Duration,
    pub reconnect: ReconnectConfig,
}

impl SourceConfig {
    /// Validate and build the criteria tree.
    ///
    /// Every configuration error is reported here, before any network activity.
    pub fn validate(&self) -> Result<ValidatedSource> {
        if self.topics.is_empty() {
            return Err(QueueratorError::config("at least one topic is required"));
        }
        if let Some(pos) = self.topics.iter().position(|t| t.trim().is_empty()) {
            return Err(QueueratorError::config(format!("topic #{} is blank", pos + 1)));
        }

        let url = Url::parse(&self.url).map_err(|e| {
            QueueratorError::config(format!("invalid endpoint \"{}\": {}", self.url, e))
        })?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(QueueratorError::config(format!(
                "endpoint \"{}\" has no host",
                self.url
            )));
        }

        if self.client_id.trim().is_empty() {
            return Err(QueueratorError::config("client id must not be empty"));
        }

        self.subscription_policy.validate()?;
        self.reconnect.validate()?;

        let criteria = self.criteria.build()?;

        Ok(ValidatedSource {
            url,
            client_id: self.client_id.clone(),
            topics: self.topics.clone(),
            criteria: Arc::new(criteria),
            subscription_policy: self.subscription_policy.clone(),
            subscribe_timeout: self.subscribe_timeout,
            disconnect_grace: self.disconnect_grace,
            reconnect: self.reconnect.clone(),
        })
    }
}

/// Handling of a failed topic subscription
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SubscriptionPolicy {
    /// Fail the whole session (baseline)
    #[default]
    Abort,
    /// Log the failure and continue with the next topic
    Skip,
    /// Retry only the failing topic with backoff, then fail the session
    Retry(RetryConfig),
}

impl SubscriptionPolicy {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Retry(retry) => retry.validate(),
            _ => Ok(()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
            Self::Retry(_) => "retry",
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum attempts per topic, including the first
    #[serde(default = "default_max_attempts", alias = "maxattempts")]
    pub max_attempts: u32,

    /// Initial backoff delay
    #[serde(
        with = "humantime_serde",
        default = "default_initial_backoff",
        alias = "initialbackoff"
    )]
    pub initial_backoff: Duration,

    /// Maximum backoff delay
    #[serde(
        with = "humantime_serde",
        default = "default_max_backoff",
        alias = "maxbackoff"
    )]
    pub max_backoff: Duration,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(QueueratorError::config("retry maxAttempts must be at least 1"));
        }
        if !(self.multiplier >= 1.0) {
            return Err(QueueratorError::config("retry multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff(self.initial_backoff, self.max_backoff, self.multiplier, attempt)
    }
}

/// Transport reconnect backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(
        with = "humantime_serde",
        default = "default_reconnect_initial",
        alias = "initialdelay"
    )]
    pub initial_delay: Duration,

    #[serde(
        with = "humantime_serde",
        default = "default_reconnect_max",
        alias = "maxdelay"
    )]
    pub max_delay: Duration,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_reconnect_initial() -> Duration {
    Duration::from_millis(100)
}

fn default_reconnect_max() -> Duration {
    Duration::from_secs(8)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_reconnect_initial(),
            max_delay: default_reconnect_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if !(self.multiplier >= 1.0) {
            return Err(QueueratorError::config("reconnect multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt`, where `attempt` starts at 1
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff(self.initial_delay, self.max_delay, self.multiplier, attempt)
    }
}

fn backoff(initial: Duration, max: Duration, multiplier: f64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63) as i32;
    let delay = initial.as_millis() as f64 * multiplier.powi(exponent);
    if !delay.is_finite() || delay >= max.as_millis() as f64 {
        return max;
    }
    Duration::from_millis(delay as u64)
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_raw(path)
            .map_err(|e| QueueratorError::config(format!("failed to load configuration: {}", e)))
    }

    fn load_raw(path: Option<&str>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables, e.g. QUEUERATOR__SOURCE__URL
        builder = builder.add_source(
            config::Environment::with_prefix("QUEUERATOR")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn source(value: serde_json::Value) -> SourceConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_source_record_shape() {
        let config = source(json!({
            "url": "nats://broker:4222",
            "clientId": "edge-1",
            "topics": ["a.1", "a.2"],
            "criteria": {"field": "temp", "op": ">", "value": 30}
        }));

        assert_eq!(config.client_id, "edge-1");
        assert_eq!(config.subscription_policy, SubscriptionPolicy::Abort);
        assert_eq!(config.disconnect_grace, Duration::from_millis(250));

        let validated = config.validate().unwrap();
        assert_eq!(validated.topics, vec!["a.1", "a.2"]);
        assert_eq!(validated.url.host_str(), Some("broker"));
        assert_eq!(validated.criteria.leaf_count(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let empty_topics = source(json!({"url": "nats://b:4222", "topics": []}));
        assert!(matches!(
            empty_topics.validate().unwrap_err(),
            QueueratorError::Configuration { .. }
        ));

        let blank_topic = source(json!({"url": "nats://b:4222", "topics": ["a", " "]}));
        assert!(blank_topic.validate().is_err());

        let bad_url = source(json!({"url": "not a url", "topics": ["a"]}));
        assert!(matches!(
            bad_url.validate(),
            Err(QueueratorError::Configuration { .. })
        ));

        let bad_criteria = source(json!({
            "url": "nats://b:4222",
            "topics": ["a"],
            "criteria": {"field": "x", "op": "between", "value": 1}
        }));
        assert!(matches!(
            bad_criteria.validate(),
            Err(QueueratorError::Criteria { .. })
        ));

        let no_client = source(json!({"url": "nats://b:4222", "topics": ["a"], "clientId": ""}));
        assert!(no_client.validate().is_err());
    }

    #[test]
    fn test_subscription_policy_forms() {
        let skip = source(json!({"topics": ["a"], "subscriptionPolicy": {"mode": "skip"}}));
        assert_eq!(skip.subscription_policy, SubscriptionPolicy::Skip);

        let retry = source(json!({
            "topics": ["a"],
            "subscriptionPolicy": {"mode": "retry", "maxAttempts": 5, "initialBackoff": "50ms"}
        }));
        match retry.subscription_policy {
            SubscriptionPolicy::Retry(ref r) => {
                assert_eq!(r.max_attempts, 5);
                assert_eq!(r.initial_backoff, Duration::from_millis(50));
                assert_eq!(r.max_backoff, Duration::from_secs(10));
            }
            ref other => panic!("unexpected policy {other:?}"),
        }

        let zero = source(json!({
            "topics": ["a"],
            "subscriptionPolicy": {"mode": "retry", "maxAttempts": 0}
        }));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_backoff() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.delay(1), Duration::from_millis(100));
        assert_eq!(reconnect.delay(2), Duration::from_millis(200));
        assert_eq!(reconnect.delay(4), Duration::from_millis(800));
        assert_eq!(reconnect.delay(100), Duration::from_secs(8));

        let retry = RetryConfig::default();
        assert_eq!(retry.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            "{}",
            json!({
                "source": {
                    "url": "nats://broker:4222",
                    "clientId": "from-file",
                    "topics": ["sensors.>"],
                    "criteria": {"any": [{"field": "temp", "op": ">=", "value": 30.5}]},
                    "disconnectGrace": "1s"
                },
                "observability": {"log_format": "pretty"}
            })
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.source.client_id, "from-file");
        assert_eq!(config.source.topics, vec!["sensors.>"]);
        assert_eq!(config.source.disconnect_grace, Duration::from_secs(1));
        assert_eq!(config.observability.log_format, "pretty");
        assert_eq!(config.observability.log_level, "info");
        assert!(config.source.validate().is_ok());
    }
}
