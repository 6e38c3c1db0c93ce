use std::path::PathBuf;
use thiserror::Error;

use crate::SessionKey;

/// Errors produced by the session pipeline.
#[derive(Debug, Error)]
pub enum VpsError {
    #[error("a process is already running for session {0}")]
    AlreadyActive(SessionKey),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to start command: {0}")]
    SpawnFailure(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("input could not be delivered: {0}")]
    Input(String),

    #[error("session cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type VpsResult<T> = Result<T, VpsError>;
