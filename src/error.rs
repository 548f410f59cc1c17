//! Failure taxonomy shared by every cache operation.
//!
//! Each variant is one failure class. None of them is meant to escape the
//! render boundary: the pager turns them into a single rendered message line.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No cache root is configured, or it cannot be created.
    #[error("caching unavailable: {reason}")]
    CachingUnavailable { reason: String },

    /// Another producer held the lock for longer than the timeout.
    #[error("timed out after {waited_ms}ms waiting for lock {}", lock.display())]
    LockTimeout { lock: PathBuf, waited_ms: u128 },

    /// Neither the caller nor the existing artifact supplied a recipe.
    #[error("no recipe for {identity}")]
    NoRecipe { identity: String },

    /// The recipe could not be run, exited unsuccessfully, or printed nothing.
    #[error("generation failed: {message}")]
    GenerationError { message: String },

    #[error("corrupt header in {}: {reason}", path.display())]
    CorruptHeader { path: PathBuf, reason: String },

    /// A freshly published artifact did not read back.
    #[error("artifact {} failed verification after publish: {reason}", path.display())]
    CorruptWrite { path: PathBuf, reason: String },

    /// Slicing content out of an artifact believed fresh failed.
    #[error("failed to read {}: {source}", path.display())]
    ReadSliceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn caching_unavailable(reason: impl Into<String>) -> Self {
        Self::CachingUnavailable {
            reason: reason.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationError {
            message: message.into(),
        }
    }

    pub fn corrupt_header(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptHeader {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short, stable name of the failure class (used in rendered messages).
    pub fn class(&self) -> &'static str {
        match self {
            Error::CachingUnavailable { .. } => "caching-unavailable",
            Error::LockTimeout { .. } => "lock-timeout",
            Error::NoRecipe { .. } => "no-recipe",
            Error::GenerationError { .. } => "generate-failed",
            Error::CorruptHeader { .. } => "corrupt-header",
            Error::CorruptWrite { .. } => "corrupt-write",
            Error::ReadSliceError { .. } => "read-failed",
            Error::Io { .. } => "io",
        }
    }

    /// Whether a later trigger for the same key may succeed without any
    /// change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}
