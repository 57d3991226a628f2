//! Error types for the walker engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::ring::RingError;

/// Fatal walk errors.
///
/// Per-node failures (an unopenable subdirectory, a failed directory read)
/// are not represented here: they are logged at the node boundary and the
/// walk continues. Only setup and queue failures abort a walk.
#[derive(Debug, Error)]
pub enum WalkError {
    /// Ring backend failure (creation, flush, or wait).
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// The root path contains an interior NUL byte and cannot be passed to
    /// the open submission.
    #[error("invalid root path: {0}")]
    InvalidPath(PathBuf),

    /// Writing an entry name to the output sink failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

/// Malformed `linux_dirent64` record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirentError {
    /// Fewer bytes remain than a record header occupies.
    #[error("dirent header truncated: expected at least {expected} bytes, got {actual}")]
    TruncatedHeader {
        /// Fixed header length.
        expected: usize,
        /// Bytes remaining in the buffer.
        actual: usize,
    },

    /// A record declared a length of zero, which can never advance the
    /// cursor.
    #[error("dirent record length is zero")]
    ZeroRecordLength,

    /// A record declared a length past the end of the returned byte range.
    #[error("dirent record overruns buffer: record length {reclen}, {remaining} bytes remaining")]
    RecordOverrun {
        /// Declared record length.
        reclen: usize,
        /// Bytes remaining in the buffer.
        remaining: usize,
    },
}
