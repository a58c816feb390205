//! Centralized error types for lookout.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the lookout library.
///
/// None of these ever escape to the host: sessions and the interception
/// layer log them and carry on. The variants mirror how far a failure reaches.
#[derive(Error, Debug)]
pub enum LookoutError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The stream no longer belongs to the message being displayed.
    #[error("Stream for '{expected}' arrived while '{found}' is displayed")]
    ProtocolViolation { expected: String, found: String },

    /// The TNEF stream could not be decoded at a specific byte offset.
    #[error("TNEF decoding error at offset {offset}: {reason}")]
    Decode { offset: u64, reason: String },

    /// Writing or finalizing a part sink failed.
    #[error("Part sink error: {0}")]
    Sink(String),

    /// A host open/save primitive failed.
    #[error("Host action failed: {0}")]
    HostDelegation(String),

    /// A single calendar item could not be submitted.
    #[error("Calendar item import failed: {0}")]
    ImportItem(String),

    /// Host globals never became available.
    #[error("Host not initialized after {attempts} attempt(s)")]
    InitializationTimeout { attempts: u32 },

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, LookoutError>`.
pub type Result<T> = std::result::Result<T, LookoutError>;

impl LookoutError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Decode` variant.
    pub fn decode(offset: u64, reason: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            reason: reason.into(),
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (prefer `LookoutError::io`).
impl From<std::io::Error> for LookoutError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
