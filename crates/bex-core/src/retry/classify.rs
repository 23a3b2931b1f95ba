//! Map engine errors to failure kinds for retry decisions.

use crate::error::{BexError, FailureKind};

/// Classify an engine error into its failure kind.
///
/// A checksum mismatch counts as a transfer failure: re-copying the file
/// is exactly the recovery a transient corruption needs.
pub fn classify(err: &BexError) -> FailureKind {
    match err {
        BexError::SpaceExhausted { .. } => FailureKind::SpaceExhausted,
        BexError::PermissionDenied { .. } => FailureKind::PermissionDenied,
        BexError::SourceUnreachable { .. } => FailureKind::SourceUnreachable,
        BexError::Transfer { .. } | BexError::ChecksumMismatch { .. } => FailureKind::Transfer,
        BexError::ResumeMismatch { .. } => FailureKind::ResumeMismatch,
        BexError::Timeout { .. } => FailureKind::Timeout,
        BexError::Cancelled => FailureKind::Cancelled,
    }
}

/// Classify a raw I/O error hit while writing to the destination.
/// Permission problems are terminal; everything else is a retryable
/// transfer failure.
pub fn classify_dest_io(offset: u64, path: &std::path::Path, err: std::io::Error) -> BexError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        BexError::PermissionDenied {
            path: path.to_path_buf(),
            source: err,
        }
    } else {
        BexError::Transfer {
            offset,
            source: err,
        }
    }
}
