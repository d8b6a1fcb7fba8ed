use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend request failed: {0}")]
    Status(u16),

    #[error("Invalid backend response: {0}")]
    Decode(String),

    #[error("Invalid multipart part: {0}")]
    InvalidPart(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;
