//! Command line entry point for the market data ingestion engine

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use market_ingest::config::EngineConfig;
use market_ingest::dispatcher::Dispatcher;
use market_ingest::queue::{Broker, InMemoryBroker};
use market_ingest::registry::DatasetRegistry;
use market_ingest::store::{self, failure_log, ConnectionGuardian};
use market_ingest::worker::WorkerExecutor;

#[derive(Parser)]
#[command(name = "market-ingest", version, about = "Daily market data ingestion engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a dataset over a date range and run the resulting tasks
    Ingest {
        /// Dataset to ingest (see `datasets` for the registered names)
        dataset: String,
        /// First day of the range, inclusive (YYYY-MM-DD)
        start_date: NaiveDate,
        /// Last day of the range, inclusive (YYYY-MM-DD)
        end_date: NaiveDate,
    },
    /// List the registered datasets
    Datasets,
}

/// Initialize the tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_ingest=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_ingest(dataset: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<()> {
    let config = EngineConfig::from_env();

    let data_pool = store::connect(&config.data_db_url).await?;
    let monitor_pool = store::connect(&config.monitor_db_url).await?;
    failure_log::ensure_schema(&monitor_pool).await?;

    let registry = Arc::new(DatasetRegistry::with_builtin_datasets(&config)?);
    let broker: Arc<InMemoryBroker> = Arc::new(InMemoryBroker::new());
    let dispatcher = Dispatcher::new(registry.clone(), broker.clone());

    // Subscribe to every queue the expansion will touch before publishing so
    // nothing is dropped
    let tasks = dispatcher.expand(dataset, start, end)?;
    let mut queues: Vec<String> = tasks
        .iter()
        .map(|task| task.queue_key().to_string())
        .collect();
    queues.sort();
    queues.dedup();
    let mut receivers: Vec<_> = queues
        .iter()
        .map(|queue| broker.subscribe(queue))
        .collect();

    let published = dispatcher.dispatch(dataset, start, end)?;
    info!(dataset, published, queues = queues.len(), "dispatch complete");

    let mut worker = WorkerExecutor::new(
        registry,
        broker,
        ConnectionGuardian::for_database(config.data_db_url.clone(), data_pool)
            .with_retry_delay(config.reconnect_delay),
        ConnectionGuardian::for_database(config.monitor_db_url.clone(), monitor_pool)
            .with_retry_delay(config.reconnect_delay),
        &config,
    );

    let mut processed = 0;
    for rx in &mut receivers {
        processed += worker.drain(rx).await;
    }
    info!(processed, "ingestion complete");
    Ok(())
}

async fn run_datasets() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let registry = DatasetRegistry::with_builtin_datasets(&config)?;
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Ingest {
            ref dataset,
            start_date,
            end_date,
        } => run_ingest(dataset, start_date, end_date).await,
        Commands::Datasets => run_datasets().await,
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        std::process::exit(1);
    }
}
