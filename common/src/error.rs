//! Common error types for the dispatch core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The request asked for an operation combination no service supports.
    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("{0}")]
    NotFound(String),

    /// Persistence or IO failure during planning; rendered as the caller's 500.
    #[error("{0}")]
    Server(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Implement conversion from anyhow::Error for easier error handling
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Server(err.to_string())
    }
}
