use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization/deserialization error: {0}")]
    Serialization(String),

    #[error("Database operation error: {0}")]
    Database(String),

    #[error("Credential store for session '{0}' is closed")]
    Closed(String),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Unknown credential category: {0}")]
    UnknownCategory(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
