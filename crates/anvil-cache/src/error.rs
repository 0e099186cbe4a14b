/// Cache layer error types
use std::path::PathBuf;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Unsupported dependency list format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error(
        "Dependency cache at {} is already registered with base directory {}, requested {}",
        .location.display(),
        .existing.display(),
        .requested.display()
    )]
    BaseDirMismatch {
        location: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },

    #[error(
        "Dependency cache at {} is already registered with a different parent",
        .location.display()
    )]
    ParentMismatch { location: PathBuf },

    #[error("Failed to encode cache: {reason}")]
    Encode { reason: String },

    #[error("I/O error at {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl CacheError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }

    /// Create an encode error
    pub fn encode(reason: impl ToString) -> Self {
        Self::Encode {
            reason: reason.to_string(),
        }
    }
}
