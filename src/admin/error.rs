use std::path::{Path, PathBuf};

use crate::types::RoadError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Archive file not found at the specified path.
    #[error("archive not found: {0}")]
    MissingArchive(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Storage layer error.
    #[error(transparent)]
    Core(#[from] RoadError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_archive(path: impl AsRef<Path>) -> Self {
        AdminError::MissingArchive(path.as_ref().to_path_buf())
    }
}
