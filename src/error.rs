use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Payload is not JSON, or a known message type carries fields of the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no string `type` field")]
    MissingType,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
