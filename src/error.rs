//! Error types for the conveyer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("queue is closed")]
    QueueClosed,

    #[error("queue failure: {0}")]
    Queue(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("repo failure: {0}")]
    Repo(String),

    #[error("pulse failed: {0}")]
    Pulse(String),

    #[error("cannot {op} a conveyer that is {from}")]
    InvalidLifecycle { from: String, op: &'static str },

    #[error("metrics are already registered")]
    AlreadyRegistered,

    #[error("execution pool is shut down")]
    PoolClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
