//! End-to-end flow: dispatch a date range, drain the queues, verify the rows
//!
//! The extractor is stubbed so nothing touches the network; everything else
//! runs the real dispatch, routing, execution, and persistence path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::SqlitePool;

use market_ingest::config::EngineConfig;
use market_ingest::dispatcher::Dispatcher;
use market_ingest::queue::{Broker, InMemoryBroker};
use market_ingest::registry::{
    DatasetRegistry, DatasetSpec, ExtractError, Extractor, ParameterGenerator,
};
use market_ingest::store::{self, failure_log, ConnectionGuardian};
use market_ingest::worker::WorkerExecutor;
use market_ingest::{RowSet, TaskParameters};

/// Mirrors the stock calendar: one record per non-Sunday day and sub-source
struct TwoSourceGenerator;

impl ParameterGenerator for TwoSourceGenerator {
    fn generate(&self, start: NaiveDate, end: NaiveDate) -> Vec<TaskParameters> {
        let mut out = Vec::new();
        let mut date = start;
        while date <= end {
            if date.weekday() != Weekday::Sun {
                for source in ["alpha", "beta"] {
                    let mut parameters = TaskParameters::new();
                    parameters.insert("crawler_date".to_string(), date.to_string());
                    parameters.insert("data_source".to_string(), source.to_string());
                    out.push(parameters);
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        out
    }
}

/// One deterministic row per (date, source) parameter record
struct StubExtractor;

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, parameters: &TaskParameters) -> Result<RowSet, ExtractError> {
        let date = parameters.get("crawler_date").cloned().unwrap_or_default();
        let source = parameters.get("data_source").cloned().unwrap_or_default();
        let mut rows = RowSet::new(vec![
            "StockID".to_string(),
            "date".to_string(),
            "Close".to_string(),
        ]);
        rows.push_row(vec![format!("{source}-2330"), date, "583.00".to_string()])
            .map_err(ExtractError::Parse)?;
        Ok(rows)
    }
}

fn registry() -> Arc<DatasetRegistry> {
    let mut registry = DatasetRegistry::new();
    registry.register(
        "daily_quotes",
        DatasetSpec {
            table: "daily_quotes".to_string(),
            key_columns: vec!["StockID".to_string(), "date".to_string()],
            generator: Arc::new(TwoSourceGenerator),
            extractor: Arc::new(StubExtractor),
        },
    );
    Arc::new(registry)
}

fn config() -> EngineConfig {
    EngineConfig {
        retry_backoff: Duration::ZERO,
        reconnect_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}

async fn stores() -> (SqlitePool, SqlitePool) {
    let data = store::connect("sqlite::memory:").await.unwrap();
    sqlx::query(
        "CREATE TABLE daily_quotes (
            StockID TEXT NOT NULL,
            date TEXT NOT NULL,
            Close TEXT,
            PRIMARY KEY (StockID, date)
        )",
    )
    .execute(&data)
    .await
    .unwrap();
    let monitor = store::connect("sqlite::memory:").await.unwrap();
    failure_log::ensure_schema(&monitor).await.unwrap();
    (data, monitor)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn run_range(
    registry: Arc<DatasetRegistry>,
    data: &SqlitePool,
    monitor: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> (usize, usize) {
    let broker = Arc::new(InMemoryBroker::new());
    let dispatcher = Dispatcher::new(registry.clone(), broker.clone());

    let mut alpha = broker.subscribe("alpha");
    let mut beta = broker.subscribe("beta");
    let published = dispatcher.dispatch("daily_quotes", start, end).unwrap();

    let config = config();
    let mut worker = WorkerExecutor::new(
        registry,
        broker,
        ConnectionGuardian::for_database("sqlite::memory:", data.clone())
            .with_retry_delay(Duration::ZERO),
        ConnectionGuardian::for_database("sqlite::memory:", monitor.clone())
            .with_retry_delay(Duration::ZERO),
        &config,
    )
    .with_worker_id("e2e-worker");

    let processed = worker.drain(&mut alpha).await + worker.drain(&mut beta).await;
    (published, processed)
}

/// Friday through Sunday: the Sunday expands to nothing, each remaining task
/// lands its row, and no failures are logged.
#[tokio::test]
async fn test_range_ingestion_lands_all_rows() {
    let (data, monitor) = stores().await;
    let (published, processed) = run_range(
        registry(),
        &data,
        &monitor,
        date(2024, 1, 5),
        date(2024, 1, 7),
    )
    .await;

    // Two non-Sunday days times two sources
    assert_eq!(published, 4);
    assert_eq!(processed, 4);

    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT StockID, date FROM daily_quotes ORDER BY StockID, date")
            .fetch_all(&data)
            .await
            .unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|(_, d)| d != "2024-01-07"));
    assert!(rows.iter().any(|(id, _)| id == "alpha-2330"));
    assert!(rows.iter().any(|(id, _)| id == "beta-2330"));

    let failures: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_failure_log")
        .fetch_one(&monitor)
        .await
        .unwrap();
    assert_eq!(failures, 0);
}

/// Re-dispatching the same range redelivers every task but duplicates nothing.
#[tokio::test]
async fn test_repeat_ingestion_is_idempotent() {
    let (data, monitor) = stores().await;
    let registry = registry();

    run_range(
        registry.clone(),
        &data,
        &monitor,
        date(2024, 1, 5),
        date(2024, 1, 6),
    )
    .await;
    let (published, processed) = run_range(
        registry,
        &data,
        &monitor,
        date(2024, 1, 5),
        date(2024, 1, 6),
    )
    .await;

    assert_eq!(published, 4);
    assert_eq!(processed, 4);

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_quotes")
        .fetch_one(&data)
        .await
        .unwrap();
    assert_eq!(stored, 4);
}

/// Overlapping ranges only add the genuinely new days.
#[tokio::test]
async fn test_overlapping_ranges_merge() {
    let (data, monitor) = stores().await;
    let registry = registry();

    run_range(
        registry.clone(),
        &data,
        &monitor,
        date(2024, 1, 2),
        date(2024, 1, 3),
    )
    .await;
    run_range(
        registry,
        &data,
        &monitor,
        date(2024, 1, 3),
        date(2024, 1, 4),
    )
    .await;

    // Three distinct weekdays times two sources
    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_quotes")
        .fetch_one(&data)
        .await
        .unwrap();
    assert_eq!(stored, 6);
}
