//! Error types shared by the broker, the router and the directory.

use thiserror::Error;

/// Largest serialized envelope the dispatcher will push (256 KiB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Errors surfaced by the broker facade to its caller.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("the source node of the AdminMessage must be defined")]
    MissingSource,

    #[error("AdminMessage is {size} bytes, larger than the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("failed to serialize AdminMessage: {0}")]
    Encode(String),

    #[error("failed to deserialize AdminMessage: {0}")]
    Decode(String),

    #[error("no bytes given for receiving the AdminMessage")]
    EmptyInput,

    #[error("invalid broker configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors raised while querying a target directory backend.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory strategy is not ready")]
    NotReady,

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("malformed target list: {0}")]
    Malformed(String),

    #[error("{0}")]
    Backend(String),
}

impl From<serde_json::Error> for DirectoryError {
    fn from(e: serde_json::Error) -> Self {
        DirectoryError::Malformed(e.to_string())
    }
}
