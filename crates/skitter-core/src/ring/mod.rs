//! The completion-ring capability consumed by the walker.
//!
//! The walker never talks to a kernel ring directly. It queues open,
//! read-directory, and close submissions through [`DirRing`], flushes them,
//! and drains `{token, result}` completions in delivery order. Two backends
//! are provided:
//!
//! - [`kernel::KernelRing`] - the production backend over io_uring (Linux)
//! - [`stub::StubRing`] - a deterministic in-memory backend for tests and
//!   non-Linux development
//!
//! Result codes follow the kernel convention: non-negative payload (a new
//! descriptor for opens, a byte count for reads, zero for closes) or a
//! negated errno.

use std::ffi::CStr;
use std::io;
use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod kernel;
pub mod stub;

/// Raw descriptor type crossing the ring boundary.
#[cfg(unix)]
pub type RawFd = std::os::fd::RawFd;

/// Raw descriptor stand-in on non-Unix hosts (stub backend only).
#[cfg(not(unix))]
pub type RawFd = i32;

/// A drained completion: the submission's correlation token plus the raw
/// result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Correlation token supplied at submission.
    pub token: u64,
    /// Operation result (payload or negated errno).
    pub result: i32,
}

/// A submission could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// No submission slot is free. Recoverable: drain completions, flush,
    /// and retry.
    #[error("submission queue full")]
    QueueFull,
}

/// Ring backend failures.
#[derive(Debug, Error)]
pub enum RingError {
    /// The ring could not be created.
    #[error("failed to create ring: {0}")]
    Create(#[source] io::Error),

    /// The kernel lacks a submission opcode the backend requires.
    #[error("kernel does not support the {0} opcode")]
    MissingOpcode(&'static str),

    /// The completion side is saturated. Recoverable: drain and retry the
    /// flush.
    #[error("completion queue busy")]
    Busy,

    /// Flushing queued submissions failed.
    #[error("submit failed: {0}")]
    Submit(#[source] io::Error),

    /// Blocking for a completion failed.
    #[error("wait for completion failed: {0}")]
    Wait(#[source] io::Error),
}

/// Submission and completion interface for directory-walk operations.
///
/// Submissions are queued by the `push_*` methods, which fail with
/// [`PushError::QueueFull`] when no slot is free, handed to the service by
/// [`submit`](DirRing::submit), and observed later through
/// [`drain_completions`](DirRing::drain_completions). Delivery order is the
/// order the service completes them, not submission order.
pub trait DirRing {
    /// Queue an open of `path` relative to `parent_fd`, or to the process
    /// working directory when `parent_fd` is `None`. The completion result
    /// is the new descriptor.
    fn push_open(
        &mut self,
        parent_fd: Option<RawFd>,
        path: &CStr,
        token: u64,
    ) -> Result<(), PushError>;

    /// Queue a directory read on `fd` into `buf`. When `rewind` is set the
    /// enumeration cursor is reset to the start of the stream first. The
    /// completion result is the number of bytes of packed records written,
    /// zero at end of stream.
    ///
    /// # Safety
    ///
    /// The caller must ensure `buf` remains valid for writes of `len` bytes
    /// until the matching completion has been drained.
    unsafe fn push_readdir(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        rewind: bool,
        token: u64,
    ) -> Result<(), PushError>;

    /// Queue a close of `fd`.
    fn push_close(&mut self, fd: RawFd, token: u64) -> Result<(), PushError>;

    /// Flush queued submissions to the service. Returns the number
    /// accepted. [`RingError::Busy`] is recoverable; anything else is
    /// fatal.
    fn submit(&mut self) -> Result<usize, RingError>;

    /// Flush queued submissions and block until at least one completion is
    /// available. The walker's sole suspension point.
    fn submit_and_wait(&mut self) -> Result<(), RingError>;

    /// Append every currently available completion to `out`, in delivery
    /// order, releasing their queue slots. Never blocks; callable
    /// repeatedly.
    fn drain_completions(&mut self, out: &mut Vec<Completion>);
}
