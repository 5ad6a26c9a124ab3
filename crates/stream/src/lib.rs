pub mod batcher;
pub mod consumer;
pub mod error;
pub mod redis;

pub use batcher::Batcher;
pub use consumer::{AckHandle, AckSink, BatchProcessor, EntryHandler, StreamEntry};
pub use error::StreamError;
pub use self::redis::RedisStreamConsumer;
