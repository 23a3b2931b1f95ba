//! Failure taxonomy for the execution engine.
//!
//! Every failure inside preflight or transfer is returned as a typed
//! `BexError` to the execution worker, which classifies it (see
//! `retry::classify`) and applies the retry policy. Terminal outcomes carry
//! both the machine-readable kind and the human-readable message.

use std::path::PathBuf;
use thiserror::Error;

/// High-level classification of a failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Preflight found too little free space on the destination volume.
    SpaceExhausted,
    /// Destination is not writable (or became unwritable mid-transfer).
    PermissionDenied,
    /// Source path is missing or unreadable.
    SourceUnreachable,
    /// I/O error mid-copy (read, write, or checksum mismatch).
    Transfer,
    /// Destination length does not match the resume offset; the next
    /// attempt must restart from zero.
    ResumeMismatch,
    /// Wall-clock execution timeout exceeded.
    Timeout,
    /// Cancellation requested by the user.
    Cancelled,
}

/// Error produced by preflight checks or the transfer engine.
#[derive(Debug, Error)]
pub enum BexError {
    #[error("insufficient free space: {free} bytes free after reservations, {required} required")]
    SpaceExhausted { free: u64, required: u64 },

    #[error("destination not writable: {path}: {source}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source unreachable: {path}: {source}")]
    SourceUnreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer failed at offset {offset}: {source}")]
    Transfer {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch after copy: {path}")]
    ChecksumMismatch { path: PathBuf },

    #[error("resume mismatch: destination has {found} bytes, expected {expected}")]
    ResumeMismatch { expected: u64, found: u64 },

    #[error("execution exceeded its {limit_secs}s timeout")]
    Timeout { limit_secs: u64 },

    #[error("cancelled by user")]
    Cancelled,
}

/// Terminal failure detail attached to an execution: the kind plus the
/// rendered message, cheap to clone and hand off to collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn from_error(err: &BexError) -> Self {
        Self {
            kind: crate::retry::classify(err),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
