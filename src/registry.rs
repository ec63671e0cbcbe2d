//! Dataset registry
//!
//! Maps each dataset identifier to its capability pair: a parameter
//! generator that enumerates units of work over a date range, and an
//! extractor that turns one parameter record into normalized rows. The
//! destination table and its declared natural-key columns live alongside.
//! The registry is populated at startup; there is no runtime module
//! resolution by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::EngineConfig;
use crate::datasets::{futures_daily, stock_price};
use crate::task::TaskParameters;
use crate::RowSet;

/// Extraction errors surfaced by dataset extractors
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream payload could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// A required parameter was absent from the task
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// The extraction call exceeded its time bound
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        ExtractError::Http(err.to_string())
    }
}

/// Enumerates the units of work a dataset defines over an inclusive date
/// range.
///
/// Each emitted parameter record must include a `data_source` key used for
/// queue routing. Dataset-specific calendar rules (e.g. skipping a known
/// non-trading day) live here.
pub trait ParameterGenerator: Send + Sync {
    /// Generate one parameter record per unit of work (day × sub-source)
    fn generate(&self, start: NaiveDate, end: NaiveDate) -> Vec<TaskParameters>;
}

/// Produces normalized rows for one parameter record.
///
/// Implementations must be deterministic enough that re-invocation with the
/// same parameters yields an equivalent row set; retry safety depends on it.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract zero or more normalized rows
    async fn extract(&self, parameters: &TaskParameters) -> Result<RowSet, ExtractError>;
}

/// Everything registered for one dataset
#[derive(Clone)]
pub struct DatasetSpec {
    /// Destination table in the primary data store
    pub table: String,
    /// Natural-key columns used for conflict resolution; declared, not inferred
    pub key_columns: Vec<String>,
    /// Parameter generator for the dispatcher
    pub generator: Arc<dyn ParameterGenerator>,
    /// Extractor invoked by workers
    pub extractor: Arc<dyn Extractor>,
}

/// Static mapping from dataset identifier to its [`DatasetSpec`]
#[derive(Default)]
pub struct DatasetRegistry {
    datasets: HashMap<String, DatasetSpec>,
}

impl DatasetRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset, replacing any previous registration of the name
    pub fn register(&mut self, name: impl Into<String>, spec: DatasetSpec) {
        self.datasets.insert(name.into(), spec);
    }

    /// Look up a dataset by name
    pub fn get(&self, name: &str) -> Option<&DatasetSpec> {
        self.datasets.get(name)
    }

    /// Names of all registered datasets, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.datasets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registry pre-populated with the built-in datasets.
    ///
    /// Fails only if the shared HTTP client cannot be constructed.
    pub fn with_builtin_datasets(config: &EngineConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.extract_timeout)
            .build()
            .map_err(|e| ExtractError::Http(format!("failed to build HTTP client: {e}")))?;

        let mut registry = Self::new();
        registry.register(
            "stock_price",
            DatasetSpec {
                table: "stock_price".to_string(),
                key_columns: vec!["StockID".to_string(), "date".to_string()],
                generator: Arc::new(stock_price::StockPriceGenerator),
                extractor: Arc::new(stock_price::StockPriceExtractor::new(client.clone())),
            },
        );
        registry.register(
            "futures_daily",
            DatasetSpec {
                table: "futures_daily".to_string(),
                key_columns: vec![
                    "FuturesID".to_string(),
                    "ContractDate".to_string(),
                    "date".to_string(),
                    "TradingSession".to_string(),
                ],
                generator: Arc::new(futures_daily::FuturesDailyGenerator),
                extractor: Arc::new(futures_daily::FuturesDailyExtractor::new(client)),
            },
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_datasets_registered() {
        let registry = DatasetRegistry::with_builtin_datasets(&EngineConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["futures_daily", "stock_price"]);

        let stock = registry.get("stock_price").unwrap();
        assert_eq!(stock.table, "stock_price");
        assert_eq!(stock.key_columns, vec!["StockID", "date"]);
    }

    #[test]
    fn test_unknown_dataset_is_none() {
        let registry = DatasetRegistry::new();
        assert!(registry.get("no_such_dataset").is_none());
    }
}
