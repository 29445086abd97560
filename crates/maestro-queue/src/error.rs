use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Stream entry {id} has no '{field}' field")]
    MissingField { id: String, field: String },

    #[error("DLQ entry not found: {id}")]
    DlqEntryNotFound { id: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;
