use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    /// The overall or connect deadline elapsed, after retries.
    #[error("Service timeout calling {service} {endpoint}")]
    ServiceTimeout { service: String, endpoint: String },

    /// Connection failures or an open circuit breaker.
    #[error("Service unavailable: {service} {endpoint}: {reason}")]
    ServiceUnavailable {
        service: String,
        endpoint: String,
        reason: String,
    },

    /// A non-success HTTP status that is not worth retrying.
    #[error("Service responded {status}: {detail}")]
    ServiceResponse { status: u16, detail: String },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl RestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RestError::ServiceResponse { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, RestError>;
