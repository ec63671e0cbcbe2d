//! Task execution with bounded retry
//!
//! A worker consumes deliveries from one or more queues, runs the dataset's
//! extractor under a time bound, and hands the resulting rows to the upsert
//! writer. Any failure is appended to the failure log, then the task is
//! resubmitted to its original queue after a backoff delay, until the attempt
//! counter reaches the retry ceiling. Exhausted tasks are abandoned; the
//! failure log is their only trace.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, info_span, Instrument};

use crate::config::EngineConfig;
use crate::queue::Broker;
use crate::registry::{DatasetRegistry, ExtractError};
use crate::store::failure_log::{self, FAILED_STATUS};
use crate::store::upsert;
use crate::store::{ConnectionGuardian, FailureRecord, StoreError};
use crate::task::{Delivery, TaskOutcome};

/// Why a task attempt failed
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The extractor failed or timed out
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// The row set could not be persisted
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// The delivery names a dataset this worker does not know
    #[error("unknown dataset: {0}")]
    Unknown(String),
}

impl TaskError {
    /// Coarse failure category for log filtering
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Extraction(_) => "extraction",
            TaskError::Persistence(_) => "persistence",
            TaskError::Unknown(_) => "unknown",
        }
    }
}

/// Executes deliveries against the data and monitoring stores
pub struct WorkerExecutor {
    registry: Arc<DatasetRegistry>,
    broker: Arc<dyn Broker>,
    data: ConnectionGuardian<SqlitePool>,
    monitor: ConnectionGuardian<SqlitePool>,
    worker_id: String,
    retry_ceiling: u32,
    retry_backoff: Duration,
    extract_timeout: Duration,
}

impl WorkerExecutor {
    /// Create a worker over guarded connections to both stores
    pub fn new(
        registry: Arc<DatasetRegistry>,
        broker: Arc<dyn Broker>,
        data: ConnectionGuardian<SqlitePool>,
        monitor: ConnectionGuardian<SqlitePool>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            broker,
            data,
            monitor,
            worker_id: default_worker_id(),
            retry_ceiling: config.retry_ceiling,
            retry_backoff: config.retry_backoff,
            extract_timeout: config.extract_timeout,
        }
    }

    /// Override the reported worker identity
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Consume deliveries until the channel closes
    pub async fn run(mut self, mut rx: UnboundedReceiver<Delivery>) {
        while let Some(delivery) = rx.recv().await {
            self.process(delivery).await;
        }
    }

    /// Process everything currently queued, including retries published while
    /// draining. Returns the number of deliveries processed.
    pub async fn drain(&mut self, rx: &mut UnboundedReceiver<Delivery>) -> usize {
        let mut processed = 0;
        while let Ok(delivery) = rx.try_recv() {
            self.process(delivery).await;
            processed += 1;
        }
        processed
    }

    /// Process a single delivery to its terminal outcome
    pub async fn process(&mut self, delivery: Delivery) -> TaskOutcome {
        let span = info_span!(
            "task",
            dataset = %delivery.task.dataset,
            delivery_id = %delivery.id,
            attempt = delivery.attempt,
        );
        async {
            match self.execute(&delivery).await {
                Ok(rows_written) => {
                    info!(rows_written, "task succeeded");
                    TaskOutcome::Succeeded { rows_written }
                }
                Err(err) => self.handle_failure(&delivery, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self, delivery: &Delivery) -> Result<usize, TaskError> {
        let registry = Arc::clone(&self.registry);
        let spec = registry
            .get(&delivery.task.dataset)
            .ok_or_else(|| TaskError::Unknown(delivery.task.dataset.clone()))?;

        let rows = tokio::time::timeout(
            self.extract_timeout,
            spec.extractor.extract(&delivery.task.parameters),
        )
        .await
        .map_err(|_| ExtractError::Timeout(self.extract_timeout))??;

        // A non-trading day yields rows-free success, not a failure
        if rows.is_empty() {
            return Ok(0);
        }

        let pool = self.data.ensure_alive().await.clone();
        let written = upsert::write(&pool, &spec.table, &spec.key_columns, &rows).await?;
        Ok(written)
    }

    async fn handle_failure(&mut self, delivery: &Delivery, err: TaskError) -> TaskOutcome {
        error!(kind = err.kind(), error = %err, "task attempt failed");

        let record = FailureRecord {
            worker: self.worker_id.clone(),
            task_id: delivery.id.to_string(),
            message: err.to_string(),
            detail: format!("{err:?}"),
            args: delivery.task.dataset.clone(),
            kwargs: serde_json::to_string(&delivery.task.parameters).unwrap_or_default(),
            retry: delivery.attempt,
            status: FAILED_STATUS,
        };
        let monitor = self.monitor.ensure_alive().await.clone();
        failure_log::record(&monitor, &record).await;

        tokio::time::sleep(self.retry_backoff).await;

        if delivery.attempt < self.retry_ceiling {
            let retry = delivery.retry();
            let attempt = retry.attempt;
            // Retries keep their original routing
            let queue = retry.task.queue_key().to_string();
            if let Err(publish_err) = self.broker.publish(&queue, retry) {
                error!(error = %publish_err, queue, "failed to resubmit task");
                return TaskOutcome::Abandoned;
            }
            TaskOutcome::Retried { attempt }
        } else {
            error!(
                attempts = delivery.attempt + 1,
                "retry ceiling exhausted, abandoning task"
            );
            TaskOutcome::Abandoned
        }
    }
}

fn default_worker_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| format!("worker-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryBroker;
    use crate::registry::{DatasetSpec, Extractor, ParameterGenerator};
    use crate::task::{Task, TaskParameters};
    use crate::RowSet;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct OneDayGenerator;

    impl ParameterGenerator for OneDayGenerator {
        fn generate(&self, start: NaiveDate, _end: NaiveDate) -> Vec<TaskParameters> {
            let mut parameters = TaskParameters::new();
            parameters.insert("crawler_date".to_string(), start.to_string());
            parameters.insert("data_source".to_string(), "stub".to_string());
            vec![parameters]
        }
    }

    struct FixedRowsExtractor;

    #[async_trait]
    impl Extractor for FixedRowsExtractor {
        async fn extract(&self, parameters: &TaskParameters) -> Result<RowSet, ExtractError> {
            let mut rows = RowSet::new(vec!["StockID".to_string(), "date".to_string()]);
            rows.push_row(vec![
                "2330".to_string(),
                parameters.get("crawler_date").cloned().unwrap_or_default(),
            ])
            .map_err(ExtractError::Parse)?;
            Ok(rows)
        }
    }

    struct EmptyExtractor;

    #[async_trait]
    impl Extractor for EmptyExtractor {
        async fn extract(&self, _parameters: &TaskParameters) -> Result<RowSet, ExtractError> {
            Ok(RowSet::new(vec!["StockID".to_string(), "date".to_string()]))
        }
    }

    fn stub_registry(extractor: Arc<dyn Extractor>) -> Arc<DatasetRegistry> {
        let mut registry = DatasetRegistry::new();
        registry.register(
            "stub",
            DatasetSpec {
                table: "stub".to_string(),
                key_columns: vec!["StockID".to_string(), "date".to_string()],
                generator: Arc::new(OneDayGenerator),
                extractor,
            },
        );
        Arc::new(registry)
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry_ceiling: 2,
            retry_backoff: Duration::ZERO,
            reconnect_delay: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    async fn worker_with(
        registry: Arc<DatasetRegistry>,
        broker: Arc<dyn Broker>,
    ) -> (WorkerExecutor, SqlitePool, SqlitePool) {
        let data = crate::store::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE stub (StockID TEXT, date TEXT, PRIMARY KEY (StockID, date))",
        )
        .execute(&data)
        .await
        .unwrap();
        let monitor = crate::store::connect("sqlite::memory:").await.unwrap();
        failure_log::ensure_schema(&monitor).await.unwrap();

        let worker = WorkerExecutor::new(
            registry,
            broker,
            ConnectionGuardian::for_database("sqlite::memory:", data.clone())
                .with_retry_delay(Duration::ZERO),
            ConnectionGuardian::for_database("sqlite::memory:", monitor.clone())
                .with_retry_delay(Duration::ZERO),
            &fast_config(),
        )
        .with_worker_id("test-worker");
        (worker, data, monitor)
    }

    fn delivery_for(dataset: &str) -> Delivery {
        let mut parameters = TaskParameters::new();
        parameters.insert("crawler_date".to_string(), "2024-01-05".to_string());
        parameters.insert("data_source".to_string(), "stub".to_string());
        Delivery::first(Task::new(dataset, parameters))
    }

    #[tokio::test]
    async fn test_successful_task_persists_rows() {
        let broker = Arc::new(InMemoryBroker::new());
        let (mut worker, data, _) =
            worker_with(stub_registry(Arc::new(FixedRowsExtractor)), broker).await;

        let outcome = worker.process(delivery_for("stub")).await;
        assert_eq!(outcome, TaskOutcome::Succeeded { rows_written: 1 });

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stub")
            .fetch_one(&data)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_empty_extraction_succeeds_without_writing() {
        let broker = Arc::new(InMemoryBroker::new());
        let (mut worker, data, _) =
            worker_with(stub_registry(Arc::new(EmptyExtractor)), broker).await;

        let outcome = worker.process(delivery_for("stub")).await;
        assert_eq!(outcome, TaskOutcome::Succeeded { rows_written: 0 });

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stub")
            .fetch_one(&data)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_unknown_dataset_retries_then_abandons() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut rx = broker.subscribe("stub");
        let (mut worker, _, monitor) =
            worker_with(stub_registry(Arc::new(FixedRowsExtractor)), broker).await;

        let outcome = worker.process(delivery_for("unregistered")).await;
        assert_eq!(outcome, TaskOutcome::Retried { attempt: 1 });

        // The retry went back to the task's original queue
        let retry = rx.try_recv().unwrap();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.task.dataset, "unregistered");

        let logged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_failure_log")
            .fetch_one(&monitor)
            .await
            .unwrap();
        assert_eq!(logged, 1);
    }
}
