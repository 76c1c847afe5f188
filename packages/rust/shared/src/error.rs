//! Error types for p2index.
//!
//! Library crates use [`P2IndexError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all p2index operations.
#[derive(Debug, thiserror::Error)]
pub enum P2IndexError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching metadata or artifacts.
    #[error("network error: {0}")]
    Network(String),

    /// Metadata, feature, filter or version parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Persisted index read/write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Downloaded content does not match its declared checksum or size.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Converting an artifact into a resource failed.
    #[error("assembly error: {0}")]
    Assembly(String),

    /// An on-demand download shared between callers failed.
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad working directory, unknown unit, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, P2IndexError>;

impl P2IndexError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a fetch that failed with this error may succeed on retry.
    ///
    /// Only transport-level failures qualify; integrity and parse failures
    /// describe the content itself and repeat on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
