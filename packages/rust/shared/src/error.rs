//! Error types for SpaceCraft.
//!
//! Library crates use [`SpaceCraftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all SpaceCraft pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum SpaceCraftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to archive.org.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON or metadata document.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad identifier, schema mismatch, bad pattern).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A collection or item does not exist (upstream or in the cache).
    #[error("not found: {0}")]
    NotFound(String),

    /// Cover image could not be decoded.
    #[error("image error: {0}")]
    Image(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpaceCraftError>;

impl SpaceCraftError {
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

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that mean "this thing is not there" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
