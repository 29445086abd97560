use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Batch provider error: {0}")]
    Provider(String),

    #[error("Data-plane error: {0}")]
    DataPlane(#[from] maestro_rest::RestError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ExtractorError>;
