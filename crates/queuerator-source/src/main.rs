//! Queuerator data source CLI
//!
//! Loads configuration (file, then `QUEUERATOR__*` environment, then flags),
//! runs one session and stops on Ctrl-C.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use queuerator_core::{AppConfig, CriteriaConfig, SubscriptionPolicy, Transport};
use queuerator_source::{DataSourceSession, MemoryTransport, NatsTransport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Abort,
    Skip,
    Retry,
}

#[derive(Parser, Debug)]
#[command(name = "queuerator-source")]
#[command(about = "Subscribe to broker topics and evaluate every message against criteria")]
#[command(version)]
struct Args {
    /// Configuration file (json, yaml or toml)
    #[arg(short, long, env = "QUEUERATOR_CONFIG")]
    config: Option<String>,

    // ─────────────────────────────────────────────────────────────────────────
    // Source overrides
    // ─────────────────────────────────────────────────────────────────────────
    /// Broker URL
    #[arg(long, env = "QUEUERATOR_URL")]
    url: Option<String>,

    /// Client identifier
    #[arg(long, env = "QUEUERATOR_CLIENT_ID")]
    client_id: Option<String>,

    /// Topics (comma-separated)
    #[arg(long, env = "QUEUERATOR_TOPICS", value_delimiter = ',')]
    topics: Vec<String>,

    /// Criteria as JSON
    #[arg(long, env = "QUEUERATOR_CRITERIA")]
    criteria: Option<String>,

    /// Subscription failure policy
    #[arg(long, value_enum)]
    subscription_policy: Option<PolicyArg>,

    /// Use the in-process broker, fed one payload per stdin line
    #[arg(long)]
    memory: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// json or pretty
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let timer = ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.6fZ".to_string());

    let registry = tracing_subscriber::registry().with(filter);
    if format == "pretty" {
        registry.with(fmt::layer().pretty().with_timer(timer)).init();
    } else {
        registry.with(fmt::layer().json().with_timer(timer)).init();
    }
}

fn apply_overrides(config: &mut AppConfig, args: &Args) -> anyhow::Result<()> {
    let source = &mut config.source;
    if let Some(ref url) = args.url {
        source.url = url.clone();
    }
    if let Some(ref client_id) = args.client_id {
        source.client_id = client_id.clone();
    }
    if !args.topics.is_empty() {
        source.topics = args.topics.iter().map(|t| t.trim().to_string()).collect();
    }
    if let Some(ref criteria) = args.criteria {
        source.criteria = serde_json::from_str::<CriteriaConfig>(criteria)
            .context("--criteria is not a valid criteria expression")?;
    }
    match args.subscription_policy {
        Some(PolicyArg::Abort) => source.subscription_policy = SubscriptionPolicy::Abort,
        Some(PolicyArg::Skip) => source.subscription_policy = SubscriptionPolicy::Skip,
        Some(PolicyArg::Retry) => {
            if !matches!(source.subscription_policy, SubscriptionPolicy::Retry(_)) {
                source.subscription_policy = SubscriptionPolicy::Retry(Default::default());
            }
        }
        None => {}
    }
    if let Some(ref level) = args.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(ref format) = args.log_format {
        config.observability.log_format = format.clone();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    apply_overrides(&mut config, &args)?;

    init_tracing(&config.observability.log_level, &config.observability.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        memory = args.memory,
        "Starting queuerator-source"
    );

    let source = config.source.validate().context("invalid source configuration")?;

    let (transport, broker): (Arc<dyn Transport>, _) = if args.memory {
        let (transport, broker) = MemoryTransport::new();
        (Arc::new(transport), Some(broker))
    } else {
        (Arc::new(NatsTransport::new()), None)
    };

    let session = DataSourceSession::new(source, transport);

    if let Some(broker) = broker {
        let mut states = session.states();
        tokio::spawn(async move {
            if states.wait_for(|s| s.is_connected()).await.is_err() {
                return;
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !broker.publish(line.into_bytes()).await {
                    break;
                }
            }
        });
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Unable to listen for shutdown signal"),
        }
    });

    match session.run(cancel).await {
        Ok(stats) => {
            info!(?stats, "queuerator-source stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "queuerator-source failed");
            Err(e.into())
        }
    }
}
