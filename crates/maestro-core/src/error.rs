use thiserror::Error;

/// Errors raised by the shared core: configuration loading and the
/// time/cron translation helpers. Subsystems carry their own error enums
/// (`QueueError`, `RestError`, `AgentError`, `SchedulerError`) and surface
/// wire codes of their own.
#[derive(Debug, Error)]
pub enum MaestroError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MaestroError {
    /// Short error code string for error payloads and logs.
    pub fn code(&self) -> &'static str {
        match self {
            MaestroError::Config(_) => "CONFIG_ERROR",
            MaestroError::Serialization(_) => "SERIALIZATION_ERROR",
            MaestroError::Io(_) => "IO_ERROR",
            MaestroError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MaestroError>;
