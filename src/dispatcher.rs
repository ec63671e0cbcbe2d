//! Date-range task dispatch
//!
//! Expands a dataset plus an inclusive date range into per-day tasks via the
//! dataset's parameter generator, then publishes each task onto the queue its
//! `data_source` names. Dispatch is fire-and-forget: it returns once every
//! task is accepted by the broker and never waits for execution.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, info_span};

use crate::queue::{Broker, QueueError};
use crate::registry::DatasetRegistry;
use crate::task::{Delivery, Task};

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The named dataset is not registered
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// The broker rejected a publish
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Expands date ranges into tasks and routes them to queues
pub struct Dispatcher {
    registry: Arc<DatasetRegistry>,
    broker: Arc<dyn Broker>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry and a broker
    pub fn new(registry: Arc<DatasetRegistry>, broker: Arc<dyn Broker>) -> Self {
        Self { registry, broker }
    }

    /// Enumerate the tasks a dispatch call would publish, without publishing.
    ///
    /// An empty expansion (e.g. a range whose only days the dataset's
    /// calendar excludes) is valid and yields an empty vector.
    pub fn expand(
        &self,
        dataset: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Task>, DispatchError> {
        let spec = self
            .registry
            .get(dataset)
            .ok_or_else(|| DispatchError::UnknownDataset(dataset.to_string()))?;
        Ok(spec
            .generator
            .generate(start, end)
            .into_iter()
            .map(|parameters| Task::new(dataset, parameters))
            .collect())
    }

    /// Expand the date range and publish every resulting task.
    ///
    /// Returns the number of tasks published.
    pub fn dispatch(
        &self,
        dataset: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize, DispatchError> {
        let span = info_span!("dispatch", dataset, %start, %end);
        let _guard = span.enter();

        let tasks = self.expand(dataset, start, end)?;
        let count = tasks.len();
        for task in tasks {
            let queue = task.queue_key().to_string();
            self.broker.publish(&queue, Delivery::first(task))?;
        }
        info!(count, "dispatched tasks");
        Ok(count)
    }
}
