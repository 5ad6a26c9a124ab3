use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    MissingVar(String),

    #[error("invalid value for {key}: {value}")]
    InvalidVar { key: String, value: String },
}
