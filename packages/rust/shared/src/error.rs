//! Error types for nbcrate.
//!
//! Library crates use [`CrateError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all crate-building operations.
#[derive(Debug, thiserror::Error)]
pub enum CrateError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching titles, stats, or payloads.
    #[error("network error: {0}")]
    Network(String),

    /// Notebook, crate, HTML or timestamp parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Metadata validation error (missing required field, bad shape, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A licence key that is not present in the licence table.
    #[error("unknown licence key: {0}")]
    Licence(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CrateError>;

impl CrateError {
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
}
