//! Task model and queue envelope

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::DEFAULT_QUEUE;

/// Ordered parameter record attached to a task.
///
/// The original request pipeline is stringly typed; a `BTreeMap` keeps
/// serialization deterministic.
pub type TaskParameters = BTreeMap<String, String>;

/// One unit of scheduled work: a dataset plus its parameter record.
///
/// Immutable once created. This is also the wire shape published to the
/// broker: `{dataset, parameters}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Name of the dataset to extract
    pub dataset: String,
    /// Parameters handed to the dataset's extractor
    pub parameters: TaskParameters,
}

impl Task {
    /// Create a new task
    pub fn new(dataset: impl Into<String>, parameters: TaskParameters) -> Self {
        Self {
            dataset: dataset.into(),
            parameters,
        }
    }

    /// Queue routing key, derived from the `data_source` parameter.
    ///
    /// An absent or empty data source routes to the default queue.
    pub fn queue_key(&self) -> &str {
        self.parameters
            .get("data_source")
            .map(String::as_str)
            .filter(|source| !source.is_empty())
            .unwrap_or(DEFAULT_QUEUE)
    }
}

/// Broker envelope wrapping a task for one delivery attempt.
///
/// The attempt counter rides on the envelope, not the task, so the task wire
/// shape stays `{dataset, parameters}` and retries publish an equivalent task
/// under a fresh delivery id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique id for this delivery attempt
    pub id: Uuid,
    /// Zero-based attempt counter; compared against the retry ceiling
    pub attempt: u32,
    /// The task being delivered
    pub task: Task,
}

impl Delivery {
    /// Wrap a freshly dispatched task (attempt 0)
    pub fn first(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 0,
            task,
        }
    }

    /// Build the follow-up delivery for a failed attempt: an equivalent task
    /// under a new id with the attempt counter advanced.
    pub fn retry(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: self.attempt + 1,
            task: self.task.clone(),
        }
    }
}

/// Terminal outcome of processing one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The extractor and writer both completed
    Succeeded {
        /// Number of rows handed to the upsert writer
        rows_written: usize,
    },
    /// The attempt failed and an equivalent task was re-enqueued
    Retried {
        /// Attempt number of the resubmitted delivery
        attempt: u32,
    },
    /// The retry ceiling was exhausted; only the failure log records remain
    Abandoned,
}
