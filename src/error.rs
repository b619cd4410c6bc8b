//! Error types for worker-beacon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("geolocation provider error: {0}")]
    Provider(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("key-value store error: {0}")]
    KeyValue(String),

    #[error("document store error: {0}")]
    Document(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("reporting service is no longer running")]
    ServiceClosed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
