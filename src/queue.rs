//! Named-queue broker boundary
//!
//! Tasks travel between the dispatcher and workers over named queues. The
//! [`Broker`] trait is the seam where an external message broker would plug
//! in; [`InMemoryBroker`] is the in-process implementation backed by
//! per-queue unbounded channels.
//!
//! Queues are independent: the transport preserves no ordering between tasks
//! on different queues and callers must not rely on ordering within one.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::task::Delivery;

/// Queue used when a task carries no usable `data_source` parameter
pub const DEFAULT_QUEUE: &str = "default";

/// Broker errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The target queue no longer accepts messages
    #[error("queue closed: {0}")]
    Closed(String),
}

/// Transport boundary for task delivery.
///
/// `publish` is callable from any number of producers; `subscribe` hands out
/// the single consumer side of a named queue.
pub trait Broker: Send + Sync {
    /// Publish a delivery onto the named queue
    fn publish(&self, queue: &str, delivery: Delivery) -> Result<(), QueueError>;

    /// Obtain the consumer end of the named queue.
    ///
    /// Deliveries published before any subscriber exists are buffered and
    /// handed to the first subscriber.
    fn subscribe(&self, queue: &str) -> UnboundedReceiver<Delivery>;
}

struct QueueEntry {
    tx: UnboundedSender<Delivery>,
    pending: Option<UnboundedReceiver<Delivery>>,
}

impl QueueEntry {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            pending: Some(rx),
        }
    }
}

/// In-process broker over per-queue unbounded channels.
///
/// Each queue has one consumer at a time; subscribing twice to the same queue
/// replaces the channel and detaches the earlier consumer.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, QueueEntry>>,
}

impl InMemoryBroker {
    /// Create a broker with no queues; queues materialize on first use
    pub fn new() -> Self {
        Self::default()
    }
}

impl Broker for InMemoryBroker {
    fn publish(&self, queue: &str, delivery: Delivery) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("queue registry poisoned");
        let entry = queues
            .entry(queue.to_string())
            .or_insert_with(QueueEntry::new);
        debug!(queue, delivery_id = %delivery.id, attempt = delivery.attempt, "publishing delivery");
        entry
            .tx
            .send(delivery)
            .map_err(|_| QueueError::Closed(queue.to_string()))
    }

    fn subscribe(&self, queue: &str) -> UnboundedReceiver<Delivery> {
        let mut queues = self.queues.lock().expect("queue registry poisoned");
        let entry = queues
            .entry(queue.to_string())
            .or_insert_with(QueueEntry::new);
        match entry.pending.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                entry.tx = tx;
                rx
            }
        }
    }
}
