//! ATL error types
//!
//! Request processing reports outcomes through [`crate::RequestStatus`];
//! these errors cover configuration, data loading and queue plumbing.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Controls data error: {0}")]
    ControlsData(String),

    #[error("Request queue full")]
    QueueFull,

    #[error("Audio processor disconnected")]
    Disconnected,
}

pub type AtlResult<T> = Result<T, AtlError>;
