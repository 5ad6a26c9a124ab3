//! Size/time batching of stream entries with deferred acknowledgement.
//!
//! Entries accumulate in a queue alongside their ack handles. A batch is
//! released when either the queue reaches `max_size` (synchronously on the
//! arrival path) or the timer fires on an untouched queue. Acks run only
//! after the processor reports success, so upstream retirement is coupled to
//! durable storage.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::consumer::{AckHandle, BatchProcessor, EntryHandler, StreamEntry};

struct BatchState {
    payloads: Vec<Value>,
    acks: Vec<AckHandle>,
    /// Skip flag: set on every arrival so the next timer tick yields instead
    /// of releasing a queue that was touched moments ago.
    touched: bool,
}

/// Coalesces per-entry deliveries into bounded batches.
pub struct Batcher {
    max_size: usize,
    processor: Arc<dyn BatchProcessor>,
    state: Mutex<BatchState>,
    shutdown: Arc<watch::Sender<bool>>,
    failed: AtomicBool,
}

impl Batcher {
    /// Create the batcher and spawn its timer task. The timer stops when the
    /// shutdown channel flips; a batch failure on the timer path flips it
    /// itself so the host exits and the broker redelivers.
    pub fn start(
        max_size: usize,
        timeout: Duration,
        processor: Arc<dyn BatchProcessor>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Arc<Self> {
        let batcher = Arc::new(Self {
            max_size,
            processor,
            state: Mutex::new(BatchState {
                payloads: Vec::new(),
                acks: Vec::new(),
                touched: false,
            }),
            shutdown: shutdown.clone(),
            failed: AtomicBool::new(false),
        });

        let timer = batcher.clone();
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            info!(timeout_millis = timeout.as_millis() as u64, "starting batch timer");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    _ = rx.changed() => break,
                }

                let mut state = timer.state.lock().await;
                if state.touched {
                    debug!("batch timer skipped iteration");
                    state.touched = false;
                    continue;
                }
                if state.payloads.is_empty() {
                    continue;
                }
                if let Err(e) = timer.release(&mut state).await {
                    error!(error = %e, "batch failed on timer path, signalling shutdown");
                    timer.failed.store(true, Ordering::SeqCst);
                    let _ = timer.shutdown.send(true);
                    break;
                }
            }
            debug!("batch timer stopped");
        });

        batcher
    }

    /// Release whatever is queued, ignoring the skip flag. Called by the host
    /// after the consumer loop has exited; failures are logged, the entries
    /// stay pending at the broker.
    pub async fn drain(&self) {
        let mut state = self.state.lock().await;
        if state.payloads.is_empty() {
            return;
        }
        info!(count = state.payloads.len(), "draining final batch");
        if let Err(e) = self.release(&mut state).await {
            warn!(error = %e, "failed to drain final batch, entries stay pending");
        }
    }

    /// Number of entries currently queued.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.payloads.len()
    }

    /// Whether a batch failed on the timer path. The host turns this into a
    /// nonzero exit so a supervisor restarts the process and the broker
    /// redelivers.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Process the queued batch and, on success, fire every deferred ack and
    /// reset the queue. On failure the queue is left intact and acks are
    /// withheld — redelivery is the broker's job.
    async fn release(&self, state: &mut BatchState) -> anyhow::Result<()> {
        let ids = self.processor.process_batch(&state.payloads).await?;
        debug!(stored = ids.len(), batch = state.payloads.len(), "batch processed");

        state.payloads.clear();
        state.touched = false;
        for ack in mem::take(&mut state.acks) {
            // An entry that fails to ack stays pending and is retried after
            // reclaim; processing is idempotent, so this is only noise.
            if let Err(e) = ack.ack().await {
                warn!(entry_id = ack.entry_id(), error = %e, "failed to ack entry");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntryHandler for Batcher {
    async fn handle_entry(&self, entry: StreamEntry) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.touched = true;
        state.payloads.push(entry.payload);
        state.acks.push(entry.ack);

        if state.payloads.len() >= self.max_size {
            info!(max_size = self.max_size, "max batch size reached, releasing");
            self.release(&mut state).await?;
        }
        Ok(())
    }
}
