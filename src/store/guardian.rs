//! Connection guardian
//!
//! Every database interaction goes through [`ConnectionGuardian::ensure_alive`],
//! which probes the handle with a trivial query and, on failure, waits and
//! reconnects until a probe succeeds. The loop is unbounded: callers block
//! until a live handle exists rather than observing a connection error.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::DEFAULT_RECONNECT_DELAY_SECS;
use crate::store::StoreError;

type ReconnectFn<H> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<H, StoreError>> + Send>> + Send + Sync>;

/// A handle whose liveness can be checked cheaply
#[async_trait]
pub trait Liveness: Send + Sync {
    /// Verify the handle still answers; any error marks it dead
    async fn probe(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl Liveness for SqlitePool {
    async fn probe(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 + 1")
            .execute(self)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::ConnectionLost(e.to_string()))
    }
}

/// Wraps a database handle with probe-and-reconnect recovery
pub struct ConnectionGuardian<H: Liveness> {
    handle: H,
    reconnect: ReconnectFn<H>,
    retry_delay: Duration,
}

impl<H: Liveness> ConnectionGuardian<H> {
    /// Guard a handle with a reconnect factory
    pub fn new<F, Fut>(handle: H, reconnect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<H, StoreError>> + Send + 'static,
    {
        Self {
            handle,
            reconnect: Box::new(move || Box::pin(reconnect())),
            retry_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
        }
    }

    /// Override the delay between a failed probe and the reconnect attempt
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Return a live handle, probing first and reconnecting as long as it
    /// takes.
    pub async fn ensure_alive(&mut self) -> &H {
        loop {
            match self.handle.probe().await {
                Ok(()) => {
                    debug!("liveness probe ok");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "liveness probe failed, reconnecting");
                    tokio::time::sleep(self.retry_delay).await;
                    match (self.reconnect)().await {
                        Ok(handle) => self.handle = handle,
                        Err(err) => {
                            warn!(error = %err, "reconnect failed, will retry");
                        }
                    }
                }
            }
        }
        &self.handle
    }
}

impl ConnectionGuardian<SqlitePool> {
    /// Guard a pool, reconnecting to the URL it was opened against
    pub fn for_database(url: impl Into<String>, pool: SqlitePool) -> Self {
        let url = url.into();
        Self::new(pool, move || {
            let url = url.clone();
            async move { crate::store::connect(&url).await }
        })
    }
}
