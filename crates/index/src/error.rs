//! Index error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to read CA bundle: {0}")]
    Io(#[from] std::io::Error),
}
