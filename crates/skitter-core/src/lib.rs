//! # skitter core
//!
//! Engine for a recursive directory-tree walk driven by a single shared
//! I/O completion queue.
//!
//! This crate provides:
//! - The ring capability boundary ([`ring::DirRing`]) with a kernel
//!   io_uring backend and a deterministic in-memory backend
//! - `linux_dirent64` record decoding
//! - The reference-counted directory-node arena
//! - The walker session: request scheduling, completion dispatch, and the
//!   drive loop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Walker                                   │
//! │   (node arena, ready-queue, in-flight accounting, drive loop)   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Dirent decoding                          │
//! │   (packed linux_dirent64 records out of a read completion)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         DirRing                                  │
//! │   (open / read-directory / close submissions and completions)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A walk keeps an arbitrary number of directories in flight at once. Each
//! directory is opened relative to its parent's descriptor, enumerated with
//! repeated directory reads into a per-node buffer, and closed once its own
//! enumeration and every child open that depended on it have finished. All
//! sequencing is done with per-node reference counts; the only blocking
//! call is the ring's "flush and wait for at least one completion".

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod dirent;
pub mod error;
pub mod node;
pub mod ring;
pub mod walker;

pub use dirent::{Dirent, DirentIter};
pub use error::{DirentError, WalkError};
pub use node::{DescriptorState, DirNode, NodeArena, NodeId};
#[cfg(target_os = "linux")]
pub use ring::kernel::KernelRing;
pub use ring::stub::{StubFs, StubRing};
pub use ring::{Completion, DirRing, PushError, RingError};
pub use walker::{WalkConfig, WalkReport, Walker};

/// Scan-buffer size per directory node (one read-directory request fills at
/// most this many bytes).
pub const SCAN_BUFFER_LEN: usize = 64 * 1024;

/// Default submission/completion queue depth.
pub const DEFAULT_RING_ENTRIES: u32 = 256;
