//! Error types for the pipeline simulation core.
//!
//! Only genuinely fallible, non-cooperative operations surface a `Result`
//! here. Rejection, back-pressure, and cancellation are state machine
//! transitions and events, not errors — see `station` and `product`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid product wire format: {0}")]
    InvalidWireFormat(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown station: {0}")]
    UnknownStation(String),

    #[error("unknown buffer: {0}")]
    UnknownBuffer(String),

    #[error("worker {0} did not stop within the grace period")]
    WorkerNotResponding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
