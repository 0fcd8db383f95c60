use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to decode update: {0}")]
    Decode(String),

    #[error("failed to apply update: {0}")]
    Apply(String),

    #[error("invalid state vector: {0}")]
    StateVector(String),
}

pub type Result<T> = std::result::Result<T, DocumentError>;
