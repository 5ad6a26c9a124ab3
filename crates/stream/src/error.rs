//! Stream error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("consumer group error: {0}")]
    Group(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("handler error: {0}")]
    Handler(anyhow::Error),
}
