//! metricsink service
//!
//! Polls website-monitoring events from a Kafka topic and persists them
//! into a PostgreSQL table, creating the destination schema and table on
//! demand. Delivery is at-least-once: offsets are committed only after a
//! fetched batch has been drained.
//!
//! ## Configuration
//!
//! Endpoints come from a layered YAML file (`config/service.yaml`, with an
//! optional `config/service.local.yaml` override); providers and
//! credentials come from environment variables:
//!
//! - `BROKER_SERVICE_PROVIDER` / `STORAGE_SERVICE_PROVIDER`: endpoint keys
//!   selecting entries in service.yaml
//! - `BROKER_USERNAME` / `BROKER_PASSWORD`: SASL PLAIN credentials
//! - `BROKER_CA_CERT` / `BROKER_SERVICE_CERT` / `BROKER_SERVICE_KEY`:
//!   client-certificate TLS paths
//! - `DB_LOGIN` / `DB_PASS`: database credentials
//!
//! A configuration problem aborts startup with a non-zero exit code before
//! any broker connection is attempted. A cancellation signal (SIGINT or
//! SIGTERM) stops the pipeline cleanly with exit code 0.
//!
//! ## Logging
//!
//! Controlled via `RUST_LOG` (default level: info):
//! ```bash
//! RUST_LOG=debug metricsink --topic website-metrics --cycles 10
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metricsink_connectors::{
    KafkaSession, PipelineConfig, PipelineRunner, PostgresSink,
};

mod config;

#[derive(Parser)]
#[command(name = "metricsink")]
#[command(about = "Website-metrics consumer: broker to relational store", long_about = None)]
struct Cli {
    /// Topic name to consume, no quotes
    #[arg(long, default_value = config::DEFAULT_TOPIC)]
    topic: String,

    /// Database schema to store metrics in, no quotes
    #[arg(long, default_value = config::DEFAULT_SCHEMA)]
    schema: String,

    /// Number of cycles to run; runs until interrupted when omitted
    #[arg(long)]
    cycles: Option<u64>,

    /// Seconds to wait between broker polls; defaults to the service.yaml setting
    #[arg(long)]
    sleep: Option<u64>,

    /// Directory holding service.yaml (and optional service.local.yaml)
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // All configuration problems surface here, before any connection.
    let settings = config::load_layered(&cli.config_dir)?;
    let env: HashMap<String, String> = std::env::vars().collect();
    let mut resolved =
        config::resolve(&settings, &env).context("configuration could not be resolved")?;
    if let Some(sleep) = cli.sleep {
        resolved.sleep_interval = Duration::from_secs(sleep);
    }

    let session = KafkaSession::new(resolved.broker.clone())?;
    let sink = PostgresSink::new(resolved.storage.clone(), &cli.schema, config::DEFAULT_TABLE)?;

    tracing::info!(
        broker = %resolved.broker.bootstrap_servers,
        storage = %resolved.storage.uri(),
        topic = %cli.topic,
        cycles = ?cli.cycles,
        "starting metricsink"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            },
        }

        let _ = shutdown_tx.send(true);
    });

    let mut runner = PipelineRunner::new(PipelineConfig {
        sleep_interval: resolved.sleep_interval,
        max_cycles: cli.cycles,
        topic_override: Some(vec![cli.topic.clone()]),
    });
    runner
        .run(Box::new(session), Box::new(sink), shutdown_rx)
        .await?;

    tracing::info!("metricsink shut down cleanly");
    Ok(())
}
