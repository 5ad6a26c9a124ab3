//! Redis Streams consumer with consumer-group semantics.
//!
//! - `XGROUP CREATE ... MKSTREAM` on start, ignoring BUSYGROUP
//! - `XREADGROUP` in two phases: pending entries first (id `"0"`), then new
//!   entries (`">"`); an empty read flips the phase so the loop drains the
//!   pending set after a restart and periodically revisits it to pick up
//!   entries moved in by the reclaim task
//! - `XACK` through [`AckHandle`]s, never from the consumer itself
//! - `XAUTOCLAIM` sidecar task taking over entries stranded on idle consumers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError, Value as RedisValue};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use newsflow_core::config::RedisConfig;

use crate::consumer::{AckHandle, AckSink, EntryHandler, StreamEntry};
use crate::error::StreamError;

/// Entries fetched per read.
const XREAD_COUNT: usize = 10;
/// Block timeout per read; expiry is non-fatal.
const XREAD_BLOCK_MILLIS: u64 = 10_000;
/// Stream field carrying the JSON document.
const PAYLOAD_FIELD: &str = "article";
/// Sleep granularity of the reclaim task between takeover attempts.
const CLAIM_TICK_MILLIS: u64 = 500;

/// Consumer-group-backed stream consumer.
pub struct RedisStreamConsumer {
    client: redis::Client,
    /// Shared connection for acks, group management and reclaim. Reads go
    /// through a dedicated connection so a blocking read never delays an ack.
    shared_conn: ConnectionManager,
    config: RedisConfig,
    shutdown: watch::Receiver<bool>,
}

impl RedisStreamConsumer {
    /// Open the broker connection, waiting with jittered exponential backoff
    /// until a PING succeeds.
    pub async fn connect(
        config: &RedisConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, StreamError> {
        let client = redis::Client::open(config.url())
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        let shared_conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        let consumer = Self {
            client,
            shared_conn,
            config: config.clone(),
            shutdown,
        };
        let mut conn = consumer.shared_conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        Ok(consumer)
    }

    /// Run the consumer loop, delivering every entry to `handler`.
    ///
    /// Returns on cooperative shutdown (`Ok`) or when the handler fails or
    /// the broker dies unrecoverably (`Err`). The reclaim task is joined on
    /// every exit path. Entries are never acked here — the handler owns the
    /// ack decision.
    pub async fn consume(
        &self,
        stream: &str,
        group: &str,
        handler: Arc<dyn EntryHandler>,
    ) -> Result<(), StreamError> {
        self.try_create_group(stream, group).await?;

        // Fresh name per process start: a restarted process must not inherit
        // its predecessor's pending entries directly, those flow through the
        // reclaim path instead.
        let consumer_name = format!("{}_{}", group, Uuid::new_v4().simple());
        info!(group, consumer = %consumer_name, stream, "consumer starting");

        let sink: Arc<dyn AckSink> = Arc::new(RedisAckSink {
            stream: stream.to_string(),
            group: group.to_string(),
            conn: self.shared_conn.clone(),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let reclaim = tokio::spawn(auto_claim(
            self.shared_conn.clone(),
            stream.to_string(),
            group.to_string(),
            consumer_name.clone(),
            self.config.claim_idle_millis,
            self.config.claim_check_interval_millis,
            self.config.claim_max_count,
            stop_rx,
            self.shutdown.clone(),
        ));

        let result = self
            .read_loop(stream, group, &consumer_name, handler, sink)
            .await;

        let _ = stop_tx.send(true);
        if reclaim.await.is_err() {
            warn!("reclaim task panicked");
        }
        result
    }

    async fn read_loop(
        &self,
        stream: &str,
        group: &str,
        consumer_name: &str,
        handler: Arc<dyn EntryHandler>,
        sink: Arc<dyn AckSink>,
    ) -> Result<(), StreamError> {
        let shutdown = self.shutdown.clone();
        let Some(mut conn) = self.reconnect().await else {
            return Ok(());
        };
        let mut check_pending = true;

        'outer: loop {
            if *shutdown.borrow() {
                info!("shutting down consumer");
                break Ok(());
            }

            // Phase P drains everything delivered-but-unacked (from "0");
            // Phase N is the steady-state fast path for new entries.
            let id = if check_pending { "0" } else { ">" };
            let opts = StreamReadOptions::default()
                .group(group, consumer_name)
                .count(XREAD_COUNT)
                .block(XREAD_BLOCK_MILLIS as usize);

            let reply: Result<Option<StreamReadReply>, RedisError> =
                conn.xread_options(&[stream], &[id], &opts).await;

            let entries = match reply {
                Ok(reply) => reply
                    .and_then(|r| r.keys.into_iter().next())
                    .map(|k| k.ids)
                    .unwrap_or_default(),
                Err(e) if is_connection_error(&e) => {
                    warn!(error = %e, "lost broker connection, reconnecting");
                    match self.reconnect().await {
                        Some(fresh) => {
                            conn = fresh;
                            continue;
                        }
                        None => break Ok(()),
                    }
                }
                Err(e) => {
                    error!(error = %e, "unrecoverable error while consuming");
                    break Err(StreamError::Read(e.to_string()));
                }
            };

            if entries.is_empty() {
                // Pending drained: move to new entries. New read timed out:
                // revisit the pending set for anything the reclaim task
                // transferred in.
                debug!(phase = if check_pending { "pending" } else { "new" }, "empty read");
                check_pending = !check_pending;
                continue;
            }

            for entry in &entries {
                if *shutdown.borrow() {
                    break 'outer Ok(());
                }
                let payload = decode_payload(entry);
                let stream_entry = StreamEntry {
                    entry_id: entry.id.clone(),
                    payload,
                    ack: AckHandle::new(entry.id.clone(), sink.clone()),
                };
                if let Err(e) = handler.handle_entry(stream_entry).await {
                    error!(entry_id = %entry.id, error = %e, "handler failed, tearing down consumer");
                    break 'outer Err(StreamError::Handler(e));
                }
                debug!(
                    entry_id = %entry.id,
                    pending = check_pending,
                    "processed entry"
                );
            }
        }
    }

    /// Create the consumer group with auto-stream-creation; an existing
    /// group is fine, anything else is fatal.
    async fn try_create_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let mut conn = self.shared_conn.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, String>(stream, group, "0")
            .await
        {
            Ok(_) => {
                info!(group, stream, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                info!(group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(StreamError::Group(e.to_string())),
        }
    }

    /// Open a fresh read connection, retrying with exponential backoff from
    /// a random 500–1000 ms and doubling until PING succeeds. Returns `None`
    /// when shutdown arrives while the broker is unreachable.
    async fn reconnect(&self) -> Option<MultiplexedConnection> {
        let mut shutdown = self.shutdown.clone();
        let mut backoff = rand::thread_rng().gen_range(500..=1000u64);

        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.client.get_multiplexed_async_connection().await {
                Ok(mut conn) => {
                    match redis::cmd("PING").query_async::<String>(&mut conn).await {
                        Ok(_) => return Some(conn),
                        Err(e) => warn!(error = %e, "broker ping failed"),
                    }
                }
                Err(e) => warn!(error = %e, "broker connection failed"),
            }
            info!(backoff_millis = backoff, "broker not ready, backing off");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                _ = shutdown.changed() => {}
            }
            backoff *= 2;
        }
    }
}

/// Broker-side acknowledgement for one stream+group.
struct RedisAckSink {
    stream: String,
    group: String,
    conn: ConnectionManager,
}

#[async_trait]
impl AckSink for RedisAckSink {
    async fn ack(&self, entry_id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let acked: i64 = conn
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(|e| StreamError::Ack(e.to_string()))?;
        debug!(entry_id, acked, "ack-d entry");
        Ok(())
    }
}

/// Periodically transfer pending entries idle beyond the threshold from any
/// consumer to this one. Claimed entries surface through Phase P of the read
/// loop. Errors here are logged and retried, never fatal to the main loop.
#[allow(clippy::too_many_arguments)]
async fn auto_claim(
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer_name: String,
    idle_millis: u64,
    check_interval_millis: u64,
    max_count: usize,
    mut stop: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
) {
    let mut waited = 0u64;
    loop {
        if *stop.borrow() || *shutdown.borrow() {
            debug!("exiting reclaim task");
            break;
        }

        if waited >= check_interval_millis {
            waited = 0;
            let mut conn = conn.clone();
            match claim_idle_entries(&mut conn, &stream, &group, &consumer_name, idle_millis, max_count)
                .await
            {
                Ok(claimed) if !claimed.is_empty() => {
                    debug!(count = claimed.len(), "claimed idle pending entries");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "error while claiming idle entries"),
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(CLAIM_TICK_MILLIS)) => {}
            _ = stop.changed() => {}
        }
        waited += CLAIM_TICK_MILLIS;
    }
}

/// `XAUTOCLAIM ... JUSTID`: transfer ownership without fetching bodies; the
/// read loop picks the entries up from the pending set.
async fn claim_idle_entries(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    consumer_name: &str,
    min_idle_millis: u64,
    count: usize,
) -> Result<Vec<String>, StreamError> {
    let reply: RedisValue = redis::cmd("XAUTOCLAIM")
        .arg(stream)
        .arg(group)
        .arg(consumer_name)
        .arg(min_idle_millis)
        .arg("0-0")
        .arg("COUNT")
        .arg(count)
        .arg("JUSTID")
        .query_async(conn)
        .await
        .map_err(|e| StreamError::Read(e.to_string()))?;
    Ok(parse_justid_reply(reply))
}

/// Parse `[next-cursor, [id, ...], [deleted-id, ...]]` into the claimed ids.
fn parse_justid_reply(reply: RedisValue) -> Vec<String> {
    let RedisValue::Array(mut parts) = reply else {
        return Vec::new();
    };
    if parts.len() < 2 {
        return Vec::new();
    }
    let RedisValue::Array(ids) = parts.swap_remove(1) else {
        return Vec::new();
    };
    ids.into_iter()
        .filter_map(|v| match v {
            RedisValue::BulkString(bytes) => String::from_utf8(bytes).ok(),
            RedisValue::SimpleString(s) => Some(s),
            _ => None,
        })
        .collect()
}

/// Extract and JSON-decode the payload field. A malformed entry decodes to
/// `Null` so the parser rejects it downstream and the batch path retires it
/// instead of looping it through reclaim forever.
fn decode_payload(entry: &StreamId) -> Value {
    let Some(raw) = entry.map.get(PAYLOAD_FIELD) else {
        error!(entry_id = %entry.id, field = PAYLOAD_FIELD, "entry is missing payload field");
        return Value::Null;
    };
    let text: String = match redis::from_redis_value(raw) {
        Ok(text) => text,
        Err(e) => {
            error!(entry_id = %entry.id, error = %e, "payload field is not a string");
            return Value::Null;
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            error!(entry_id = %entry.id, error = %e, payload = %text, "payload is not valid JSON");
            Value::Null
        }
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal()
}
