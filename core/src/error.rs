use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaccoError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Callback carries no correlation id")]
    MissingCorrelationId,

    #[error("No payment request matches correlation id '{0}'")]
    RequestNotFound(String),

    #[error("Allocation inconsistency: {0}")]
    AllocationInconsistency(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SaccoResult<T> = Result<T, SaccoError>;
