use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Request to {route} failed: {source}")]
    Transport {
        route: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{route} responded with status {status}")]
    Status { route: String, status: u16 },

    #[error("Invalid response body from {route}: {message}")]
    Decode { route: String, message: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Microphone unavailable: {0}")]
    MicrophoneDenied(String),

    #[error("Recorder error: {0}")]
    RecorderError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
