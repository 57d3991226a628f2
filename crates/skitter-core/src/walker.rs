//! Walker session: request scheduling, completion dispatch, and the drive
//! loop tying them together.
//!
//! One session owns the node arena, the FIFO ready-queue, and the in-flight
//! counter. The loop alternates between the ring's "flush and wait for at
//! least one completion" and a dispatch pass that routes every ready node
//! to the handler for its lifecycle phase. Handlers submit further work
//! through the same backpressure-aware scheduling path, so a full
//! submission queue drains completed work instead of deadlocking against
//! it.

use std::collections::VecDeque;
use std::ffi::CString;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::SCAN_BUFFER_LEN;
use crate::dirent::DirentIter;
use crate::error::WalkError;
use crate::node::{DescriptorState, NodeArena, NodeId};
use crate::ring::{Completion, DirRing, PushError, RawFd, RingError};

/// Tunables for one walk.
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Bytes of scan buffer allocated per directory node.
    pub scan_buffer_len: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            scan_buffer_len: SCAN_BUFFER_LEN,
        }
    }
}

/// Summary of a finished walk.
#[derive(Debug, Clone)]
pub struct WalkReport {
    /// Names emitted (every non-`.`/`..` entry, directory or not).
    pub entries: u64,
    /// Directories successfully opened, root included.
    pub directories: u64,
    /// The backend reported the directory-read operation as unsupported;
    /// the walk ended early as a clean skip.
    pub unsupported: bool,
    /// Wall-clock duration of the walk.
    pub duration: Duration,
}

/// A directory-tree walk against one ring backend.
///
/// Entry names are written to the sink one per line, raw bytes, in
/// discovery order. The session is single-threaded: concurrency exists
/// only as multiple operations in flight against the ring.
pub struct Walker<'r, R: DirRing, W: Write> {
    ring: &'r mut R,
    sink: W,
    config: WalkConfig,
    nodes: NodeArena,
    ready: VecDeque<NodeId>,
    scratch: Vec<Completion>,
    in_flight: usize,
    rewind_issued: bool,
    unsupported: bool,
    entries: u64,
    directories: u64,
}

impl<'r, R: DirRing, W: Write> Walker<'r, R, W> {
    /// Create a session over `ring`, emitting entry names to `sink`.
    pub fn new(ring: &'r mut R, config: WalkConfig, sink: W) -> Self {
        Self {
            ring,
            sink,
            config,
            nodes: NodeArena::new(),
            ready: VecDeque::new(),
            scratch: Vec::new(),
            in_flight: 0,
            rewind_issued: false,
            unsupported: false,
            entries: 0,
            directories: 0,
        }
    }

    /// Walk the tree rooted at `root` to completion.
    pub fn walk(mut self, root: &Path) -> Result<WalkReport, WalkError> {
        let start = Instant::now();
        let name = path_to_cstring(root)?;
        self.spawn_dir(None, name)?;

        while self.in_flight > 0 {
            match self.ring.submit_and_wait() {
                Ok(()) => {}
                Err(RingError::Busy) => {}
                Err(err) => return Err(err.into()),
            }

            self.drain();

            while let Some(id) = self.ready.pop_front() {
                self.dispatch(id)?;
                if self.unsupported {
                    info!("directory reads unsupported by ring backend, skipping walk");
                    return Ok(self.report(start));
                }
            }
        }

        self.sink.flush()?;
        Ok(self.report(start))
    }

    fn report(&self, start: Instant) -> WalkReport {
        WalkReport {
            entries: self.entries,
            directories: self.directories,
            unsupported: self.unsupported,
            duration: start.elapsed(),
        }
    }

    // ---- scheduling ----------------------------------------------------

    /// Drain-then-flush, the consumer-side progress that makes room when
    /// the submission queue is full.
    fn relieve_pressure(&mut self) -> Result<(), WalkError> {
        self.drain();
        match self.ring.submit() {
            Ok(_) | Err(RingError::Busy) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Allocate a node for a directory and submit its open.
    ///
    /// The parent's refcount is raised here and released by the child's
    /// open completion; children are only ever discovered while their
    /// parent's descriptor is open.
    fn spawn_dir(&mut self, parent: Option<NodeId>, name: CString) -> Result<(), WalkError> {
        let mut parent_fd = None;
        if let Some(parent) = parent {
            if let Some(node) = self.nodes.get_mut(parent) {
                if let DescriptorState::Open(fd) = node.state {
                    node.refcount += 1;
                    parent_fd = Some(fd);
                }
            }
        }

        let id = self.nodes.insert(name.clone(), parent, self.config.scan_buffer_len);
        loop {
            match self.ring.push_open(parent_fd, &name, id.token()) {
                Ok(()) => break,
                Err(PushError::QueueFull) => self.relieve_pressure()?,
            }
        }
        self.in_flight += 1;
        Ok(())
    }

    fn submit_readdir(&mut self, id: NodeId, rewind: bool) -> Result<(), WalkError> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(());
        };
        let DescriptorState::Open(fd) = node.state else {
            debug_assert!(false, "readdir submitted on non-open node");
            return Ok(());
        };
        let buf = node.scan_buffer.as_mut_ptr();
        let len = node.scan_buffer.len();

        loop {
            // SAFETY: the buffer is boxed inside the node, whose slot is
            // not recycled until its close completion - long after this
            // read's completion is drained.
            let pushed = unsafe { self.ring.push_readdir(fd, buf, len, rewind, id.token()) };
            match pushed {
                Ok(()) => break,
                Err(PushError::QueueFull) => self.relieve_pressure()?,
            }
        }
        self.in_flight += 1;
        Ok(())
    }

    fn submit_close(&mut self, id: NodeId, fd: RawFd) -> Result<(), WalkError> {
        loop {
            match self.ring.push_close(fd, id.token()) {
                Ok(()) => break,
                Err(PushError::QueueFull) => self.relieve_pressure()?,
            }
        }
        self.in_flight += 1;
        Ok(())
    }

    /// Drop one open reason; the last one out submits the close.
    fn deref_node(&mut self, id: NodeId) -> Result<(), WalkError> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(());
        };
        node.refcount = node.refcount.saturating_sub(1);
        if node.refcount > 0 {
            return Ok(());
        }
        let DescriptorState::Open(fd) = node.state else {
            debug_assert!(false, "refcount reached zero off the open state");
            return Ok(());
        };
        node.state = DescriptorState::Closing;
        self.submit_close(id, fd)
    }

    // ---- completion handling -------------------------------------------

    /// Move every available completion into the ready-queue, in delivery
    /// order.
    fn drain(&mut self) {
        self.scratch.clear();
        self.ring.drain_completions(&mut self.scratch);
        self.in_flight = self.in_flight.saturating_sub(self.scratch.len());
        for completion in &self.scratch {
            let id = NodeId::from_token(completion.token);
            match self.nodes.get_mut(id) {
                Some(node) => {
                    node.pending_result = completion.result;
                    self.ready.push_back(id);
                }
                None => warn!(token = completion.token, "completion for unknown node"),
            }
        }
    }

    /// Route a ready node to the handler for its lifecycle phase.
    fn dispatch(&mut self, id: NodeId) -> Result<(), WalkError> {
        let Some(node) = self.nodes.get(id) else {
            return Ok(());
        };
        match node.state {
            DescriptorState::Pending => self.on_open_complete(id),
            DescriptorState::Open(_) => self.on_read_complete(id),
            DescriptorState::Closing => {
                self.nodes.remove(id);
                Ok(())
            }
        }
    }

    fn on_open_complete(&mut self, id: NodeId) -> Result<(), WalkError> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(());
        };
        let ret = node.pending_result;
        let parent = node.parent;

        if ret < 0 {
            warn!(
                name = %node.name.to_string_lossy(),
                error = %io::Error::from_raw_os_error(-ret),
                "failed to open directory, skipping subtree"
            );
            // The node stays inert in the arena; releasing the parent here
            // keeps its close from hanging on an abandoned child.
            if let Some(parent) = parent {
                self.deref_node(parent)?;
            }
            return Ok(());
        }

        node.state = DescriptorState::Open(ret);
        self.directories += 1;
        if let Some(parent) = parent {
            // Opening needed the parent's descriptor only as the base of
            // the relative path; that reason ends here.
            self.deref_node(parent)?;
        }
        self.submit_readdir(id, false)
    }

    fn on_read_complete(&mut self, id: NodeId) -> Result<(), WalkError> {
        let Some(node) = self.nodes.get(id) else {
            return Ok(());
        };
        let ret = node.pending_result;
        let is_root = node.parent.is_none();

        if ret == -libc::EINVAL {
            self.unsupported = true;
            return Ok(());
        }
        if ret < 0 {
            // The descriptor is deliberately left open here, matching the
            // reference lifecycle; see DESIGN.md on the read-error leak.
            warn!(
                name = %node.name.to_string_lossy(),
                error = %io::Error::from_raw_os_error(-ret),
                "directory read failed"
            );
            return Ok(());
        }
        if ret == 0 {
            if is_root && !self.rewind_issued {
                self.rewind_issued = true;
                return self.submit_readdir(id, true);
            }
            return self.deref_node(id);
        }

        let (children, corrupt) = self.collect_entries(id, ret as usize)?;
        for name in children {
            match CString::new(name) {
                Ok(name) => self.spawn_dir(Some(id), name)?,
                Err(_) => warn!("directory entry name contains NUL, not descending"),
            }
        }
        if corrupt {
            // Stop enumerating a stream we can no longer trust.
            return self.deref_node(id);
        }
        self.submit_readdir(id, false)
    }

    /// Parse one read's span of the node's scan buffer: emit every
    /// non-dot name and return the subdirectory names to descend into.
    fn collect_entries(&mut self, id: NodeId, len: usize) -> Result<(Vec<Vec<u8>>, bool), WalkError> {
        let mut children = Vec::new();
        let mut emitted = 0u64;
        let mut corrupt = false;

        let Some(node) = self.nodes.get(id) else {
            return Ok((children, false));
        };
        for record in DirentIter::new(&node.scan_buffer[..len]) {
            match record {
                Ok(entry) if entry.is_dot() => {}
                Ok(entry) => {
                    if entry.is_dir() {
                        children.push(entry.name.to_vec());
                    }
                    self.sink.write_all(entry.name)?;
                    self.sink.write_all(b"\n")?;
                    emitted += 1;
                }
                Err(err) => {
                    warn!(
                        name = %node.name.to_string_lossy(),
                        error = %err,
                        "malformed directory stream"
                    );
                    corrupt = true;
                    break;
                }
            }
        }
        self.entries += emitted;
        debug!(emitted, subdirs = children.len(), "parsed directory read");
        Ok((children, corrupt))
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString, WalkError> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| WalkError::InvalidPath(path.to_path_buf()))
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString, WalkError> {
    CString::new(path.to_string_lossy().into_owned())
        .map_err(|_| WalkError::InvalidPath(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::stub::{StubFs, StubRing};

    #[test]
    fn test_empty_root_emits_nothing() {
        let mut ring = StubRing::new(StubFs::new());
        let mut out = Vec::new();
        let report = Walker::new(&mut ring, WalkConfig::default(), &mut out)
            .walk(Path::new("root"))
            .unwrap();

        assert_eq!(report.entries, 0);
        assert_eq!(report.directories, 1);
        assert!(out.is_empty());
        assert_eq!(ring.opens(), 1);
        assert_eq!(ring.closes(), 1);
    }

    #[test]
    fn test_invalid_root_path_rejected() {
        let mut ring = StubRing::new(StubFs::new());
        let err = Walker::new(&mut ring, WalkConfig::default(), Vec::new())
            .walk(Path::new("bad\0path"));
        assert!(matches!(err, Err(WalkError::InvalidPath(_))));
    }
}
