use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The reminder record cannot be turned into a trigger.
    #[error("Invalid schedule for reminder {id}: {reason}")]
    InvalidSchedule { id: String, reason: String },

    #[error("Data-plane error: {0}")]
    DataPlane(#[from] maestro_rest::RestError),

    #[error("Queue error: {0}")]
    Queue(#[from] maestro_queue::QueueError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
