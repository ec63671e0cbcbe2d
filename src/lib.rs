//! # Market Ingest Library
//!
//! A library for ingesting daily financial market records (equities, futures)
//! from external web sources into a relational store, tolerating transient
//! network and database failures.
//!
//! ## Features
//!
//! - **Task Dispatch**: Expands a (dataset, date-range) request into independent
//!   per-day fetch tasks routed over named queues
//! - **Bounded Retry**: At-least-once execution with a configurable retry ceiling
//!   and backoff between attempts
//! - **Idempotent Persistence**: Conflict-safe upsert writes so redelivered tasks
//!   never duplicate rows
//! - **Connection Recovery**: Database handles are probed before use and
//!   transparently reconnected
//! - **Failure Audit**: Every failed attempt leaves a durable record in a
//!   monitoring table
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use market_ingest::config::EngineConfig;
//! use market_ingest::dispatcher::Dispatcher;
//! use market_ingest::queue::InMemoryBroker;
//! use market_ingest::registry::DatasetRegistry;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env();
//! let registry = Arc::new(DatasetRegistry::with_builtin_datasets(&config)?);
//! let broker = Arc::new(InMemoryBroker::new());
//!
//! // One task per qualifying day and sub-source, routed by data source
//! let dispatcher = Dispatcher::new(registry, broker);
//! let start = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
//! let published = dispatcher.dispatch("stock_price", start, end)?;
//! println!("published {published} tasks");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`task`] - The unit of work (dataset + parameters + queue routing)
//! - [`registry`] - Static registry of datasets and their generate/extract pair
//! - [`dispatcher`] - Expansion of date ranges into queued tasks
//! - [`queue`] - Named-queue broker boundary
//! - [`worker`] - Task execution with the retry policy
//! - [`store`] - Connection guardian, upsert writer, and failure logger
//! - [`datasets`] - Built-in dataset implementations
//!
//! ## Data Flow
//!
//! request → dispatcher → N tasks → per-queue delivery → worker → extractor →
//! rows → upsert writer → store; on failure: failure logger + re-enqueue up to
//! the retry ceiling.

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};

/// Process configuration
pub mod config;

/// Built-in dataset implementations
pub mod datasets;

/// Request expansion and task routing
pub mod dispatcher;

/// Named-queue broker boundary
pub mod queue;

/// Dataset registry with generate/extract capability pairs
pub mod registry;

/// Database access: guardian, upsert writer, failure log
pub mod store;

/// Task model and queue envelope
pub mod task;

/// Worker executor and retry policy
pub mod worker;

// Re-export commonly used types
pub use task::{Delivery, Task, TaskOutcome, TaskParameters};

/// A uniform tabular batch of extracted records.
///
/// Rows are homogeneous over a fixed, ordered column list. Values are kept as
/// plain strings end to end; a blank string is the "empty" sentinel that the
/// upsert writer's sparse-update policy must never let overwrite an existing
/// non-empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RowSet {
    /// Create an empty row set with the given ordered column list
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append one row; the value count must match the column count
    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), String> {
        if row.len() != self.columns.len() {
            return Err(format!(
                "Row has {} values but the row set declares {} columns",
                row.len(),
                self.columns.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Ordered column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows, in insertion order
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the row set holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
