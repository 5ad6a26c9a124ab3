//! Stream consumer contract and entry types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StreamError;

/// Sink an [`AckHandle`] acknowledges through — the broker client with the
/// stream and group baked in.
#[async_trait]
pub trait AckSink: Send + Sync {
    /// Retire the entry from the group's pending set.
    async fn ack(&self, entry_id: &str) -> Result<(), StreamError>;
}

/// Explicit acknowledgement object for one delivered entry.
///
/// Acking is idempotent at the broker: re-acking an already retired id is a
/// no-op, only the first call is semantically meaningful. The consumer never
/// acks on its own — whoever holds the handle decides when the entry counts
/// as processed.
#[derive(Clone)]
pub struct AckHandle {
    entry_id: String,
    sink: Arc<dyn AckSink>,
}

impl AckHandle {
    pub fn new(entry_id: String, sink: Arc<dyn AckSink>) -> Self {
        Self { entry_id, sink }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub async fn ack(&self) -> Result<(), StreamError> {
        self.sink.ack(&self.entry_id).await
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("entry_id", &self.entry_id)
            .finish()
    }
}

/// A single entry delivered from the stream.
#[derive(Debug)]
pub struct StreamEntry {
    /// Broker-assigned, monotonically increasing id.
    pub entry_id: String,
    /// JSON-decoded payload of the entry's `article` field.
    pub payload: Value,
    /// Deferred acknowledgement for this entry.
    pub ack: AckHandle,
}

/// Receives entries on the consumer's loop. Handlers must not perform
/// unbounded blocking work — heavy processing belongs downstream of the
/// batcher release.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn handle_entry(&self, entry: StreamEntry) -> anyhow::Result<()>;
}

/// Downstream contract of the batcher: processes a released batch and
/// returns the ids of the documents that were durably stored.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, batch: &[Value]) -> anyhow::Result<Vec<String>>;
}
