//! Deterministic in-memory ring backend.
//!
//! Models a small directory tree plus a completion pipeline with bounded
//! submission slots, so walker lifecycle behavior - backpressure retries,
//! multi-read enumeration, the one-time root rewind, capability probing,
//! and refcount-driven closes - can be driven without a kernel ring.
//! Submissions are staged by the `push_*` methods, executed in FIFO order
//! by [`submit`](DirRing::submit), and delivered by
//! [`drain_completions`](DirRing::drain_completions).
//!
//! The stub also keeps open/close/rewind counters so tests can assert that
//! every descriptor handed out is returned exactly once.

use std::collections::HashMap;

use crate::dirent::{self, DT_DIR, DT_REG, DT_UNKNOWN};

use super::{Completion, DirRing, PushError, RawFd, RingError};

/// Identifier of a directory inside a [`StubFs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubDirId(usize);

#[derive(Debug)]
struct StubEntry {
    name: Vec<u8>,
    d_type: u8,
    /// Target directory when this entry is a subdirectory.
    dir: Option<usize>,
}

#[derive(Debug, Default)]
struct StubDir {
    entries: Vec<StubEntry>,
}

/// In-memory directory tree served by [`StubRing`].
#[derive(Debug)]
pub struct StubFs {
    dirs: Vec<StubDir>,
}

impl StubFs {
    /// Create a tree holding only an empty root.
    pub fn new() -> Self {
        Self {
            dirs: vec![StubDir::default()],
        }
    }

    /// The root directory (what an open with no parent resolves to).
    pub fn root(&self) -> StubDirId {
        StubDirId(0)
    }

    /// Add a plain file entry.
    pub fn add_file(&mut self, dir: StubDirId, name: &str) {
        self.dirs[dir.0].entries.push(StubEntry {
            name: name.as_bytes().to_vec(),
            d_type: DT_REG,
            dir: None,
        });
    }

    /// Add a subdirectory entry and return its identifier.
    pub fn add_dir(&mut self, dir: StubDirId, name: &str) -> StubDirId {
        self.dirs.push(StubDir::default());
        let id = self.dirs.len() - 1;
        self.dirs[dir.0].entries.push(StubEntry {
            name: name.as_bytes().to_vec(),
            d_type: DT_DIR,
            dir: Some(id),
        });
        StubDirId(id)
    }

    /// Add an entry that really is a directory but whose type tag reads
    /// `DT_UNKNOWN`, as on filesystems that do not populate types.
    pub fn add_untyped_dir(&mut self, dir: StubDirId, name: &str) -> StubDirId {
        let id = self.add_dir(dir, name);
        if let Some(entry) = self.dirs[dir.0].entries.last_mut() {
            entry.d_type = DT_UNKNOWN;
        }
        id
    }
}

impl Default for StubFs {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum QueuedOp {
    Open {
        parent: Option<RawFd>,
        path: Vec<u8>,
        token: u64,
    },
    Readdir {
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        rewind: bool,
        token: u64,
    },
    Close {
        fd: RawFd,
        token: u64,
    },
}

#[derive(Debug)]
struct OpenState {
    dir: usize,
    /// Enumeration cursor over `.`/`..` plus the directory's entries.
    cursor: usize,
}

/// Scriptable [`DirRing`] over a [`StubFs`].
///
/// Every queued operation completes at the next flush; completion delivery
/// order is submission order, which keeps test expectations readable.
#[derive(Debug)]
pub struct StubRing {
    fs: StubFs,
    slots: usize,
    queued: Vec<QueuedOp>,
    completed: Vec<Completion>,
    open_table: HashMap<RawFd, OpenState>,
    next_fd: RawFd,

    // Behavior switches
    entries_per_read: usize,
    readdir_einval: bool,
    rewind_replays: bool,
    fail_open: Vec<Vec<u8>>,

    // Counters
    opens: usize,
    closes: usize,
    rewinds: usize,
}

impl StubRing {
    /// Wrap `fs` with an effectively unbounded submission queue.
    pub fn new(fs: StubFs) -> Self {
        Self::with_slots(fs, usize::MAX)
    }

    /// Wrap `fs` with a bounded submission queue of `slots` staged entries,
    /// for exercising the queue-full retry protocol.
    pub fn with_slots(fs: StubFs, slots: usize) -> Self {
        Self {
            fs,
            slots,
            queued: Vec::new(),
            completed: Vec::new(),
            open_table: HashMap::new(),
            next_fd: 100,
            entries_per_read: usize::MAX,
            readdir_einval: false,
            rewind_replays: false,
            fail_open: Vec::new(),
            opens: 0,
            closes: 0,
            rewinds: 0,
        }
    }

    /// Serve at most `n` records per directory read, forcing multi-read
    /// enumeration.
    pub fn set_entries_per_read(&mut self, n: usize) {
        self.entries_per_read = n.max(1);
    }

    /// Answer every directory read with `-EINVAL`, as a kernel without the
    /// opcode would.
    pub fn set_readdir_unsupported(&mut self, unsupported: bool) {
        self.readdir_einval = unsupported;
    }

    /// Make a rewound read replay the listing from the start instead of
    /// reporting end-of-stream.
    pub fn set_rewind_replays(&mut self, replays: bool) {
        self.rewind_replays = replays;
    }

    /// Fail opens of the directory named `name` with `-EACCES`.
    pub fn fail_open(&mut self, name: &str) {
        self.fail_open.push(name.as_bytes().to_vec());
    }

    /// Opens that handed out a descriptor.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Descriptors returned through close.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes
    }

    /// Rewind reads observed.
    #[must_use]
    pub fn rewinds(&self) -> usize {
        self.rewinds
    }

    fn stage(&mut self, op: QueuedOp) -> Result<(), PushError> {
        if self.queued.len() >= self.slots {
            return Err(PushError::QueueFull);
        }
        self.queued.push(op);
        Ok(())
    }

    fn exec(&mut self, op: QueuedOp) -> Completion {
        match op {
            QueuedOp::Open {
                parent,
                path,
                token,
            } => self.exec_open(parent, &path, token),
            QueuedOp::Readdir {
                fd,
                buf,
                len,
                rewind,
                token,
            } => self.exec_readdir(fd, buf, len, rewind, token),
            QueuedOp::Close { fd, token } => self.exec_close(fd, token),
        }
    }

    fn exec_open(&mut self, parent: Option<RawFd>, path: &[u8], token: u64) -> Completion {
        if self.fail_open.iter().any(|p| p == path) {
            return Completion {
                token,
                result: -libc::EACCES,
            };
        }

        let dir = match parent {
            // An open with no base resolves to the tree root, whatever the
            // path segment says.
            None => 0,
            Some(fd) => {
                let Some(state) = self.open_table.get(&fd) else {
                    return Completion {
                        token,
                        result: -libc::EBADF,
                    };
                };
                let target = self.fs.dirs[state.dir]
                    .entries
                    .iter()
                    .find(|e| e.name == path)
                    .and_then(|e| e.dir);
                match target {
                    Some(dir) => dir,
                    None => {
                        return Completion {
                            token,
                            result: -libc::ENOENT,
                        };
                    }
                }
            }
        };

        let fd = self.next_fd;
        self.next_fd += 1;
        self.open_table.insert(fd, OpenState { dir, cursor: 0 });
        self.opens += 1;
        Completion { token, result: fd }
    }

    fn exec_readdir(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        rewind: bool,
        token: u64,
    ) -> Completion {
        if self.readdir_einval {
            return Completion {
                token,
                result: -libc::EINVAL,
            };
        }
        let Some(state) = self.open_table.get_mut(&fd) else {
            return Completion {
                token,
                result: -libc::EBADF,
            };
        };
        if rewind {
            self.rewinds += 1;
            if self.rewind_replays {
                state.cursor = 0;
            }
        }

        let dir = &self.fs.dirs[state.dir];
        let mut encoded = Vec::new();
        let mut served = 0usize;
        // Records 0 and 1 of every directory are the synthetic dot entries,
        // exactly as a kernel read reports them.
        let total = dir.entries.len() + 2;
        while state.cursor < total && served < self.entries_per_read {
            let (name, d_type): (&[u8], u8) = match state.cursor {
                0 => (b".", DT_DIR),
                1 => (b"..", DT_DIR),
                n => {
                    let entry = &dir.entries[n - 2];
                    (&entry.name, entry.d_type)
                }
            };
            if encoded.len() + dirent::record_len(name) > len {
                break;
            }
            dirent::append_record(&mut encoded, 1 + state.cursor as u64, d_type, name);
            state.cursor += 1;
            served += 1;
        }

        // SAFETY: buf/len form a writable span until this completion is
        // drained, per the push_readdir contract; encoded fits by the
        // length check above.
        unsafe {
            std::ptr::copy_nonoverlapping(encoded.as_ptr(), buf, encoded.len());
        }
        Completion {
            token,
            result: encoded.len() as i32,
        }
    }

    fn exec_close(&mut self, fd: RawFd, token: u64) -> Completion {
        if self.open_table.remove(&fd).is_none() {
            // A close of a never-opened or already-closed descriptor is a
            // walker lifecycle bug; surface it as the kernel would.
            return Completion {
                token,
                result: -libc::EBADF,
            };
        }
        self.closes += 1;
        Completion { token, result: 0 }
    }
}

impl DirRing for StubRing {
    fn push_open(
        &mut self,
        parent_fd: Option<RawFd>,
        path: &std::ffi::CStr,
        token: u64,
    ) -> Result<(), PushError> {
        self.stage(QueuedOp::Open {
            parent: parent_fd,
            path: path.to_bytes().to_vec(),
            token,
        })
    }

    unsafe fn push_readdir(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        rewind: bool,
        token: u64,
    ) -> Result<(), PushError> {
        self.stage(QueuedOp::Readdir {
            fd,
            buf,
            len,
            rewind,
            token,
        })
    }

    fn push_close(&mut self, fd: RawFd, token: u64) -> Result<(), PushError> {
        self.stage(QueuedOp::Close { fd, token })
    }

    fn submit(&mut self) -> Result<usize, RingError> {
        let ops: Vec<_> = self.queued.drain(..).collect();
        let count = ops.len();
        for op in ops {
            let completion = self.exec(op);
            self.completed.push(completion);
        }
        Ok(count)
    }

    fn submit_and_wait(&mut self) -> Result<(), RingError> {
        self.submit()?;
        if self.completed.is_empty() {
            return Err(RingError::Wait(std::io::Error::other(
                "wait with no operation in flight",
            )));
        }
        Ok(())
    }

    fn drain_completions(&mut self, out: &mut Vec<Completion>) {
        out.append(&mut self.completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_open_readdir_close_cycle() {
        let mut fs = StubFs::new();
        fs.add_file(fs.root(), "hello");
        let mut ring = StubRing::new(fs);

        let path = CString::new("root").unwrap();
        ring.push_open(None, &path, 0).unwrap();
        ring.submit_and_wait().unwrap();
        let mut completions = Vec::new();
        ring.drain_completions(&mut completions);
        let fd = completions[0].result;
        assert!(fd >= 0);
        assert_eq!(ring.opens(), 1);

        let mut buf = vec![0u8; 4096];
        // SAFETY: buf outlives the drain below.
        unsafe {
            ring.push_readdir(fd, buf.as_mut_ptr(), buf.len(), false, 0)
                .unwrap();
        }
        ring.submit_and_wait().unwrap();
        completions.clear();
        ring.drain_completions(&mut completions);
        let read = completions[0].result as usize;
        let names: Vec<_> = crate::dirent::DirentIter::new(&buf[..read])
            .map(|r| r.unwrap().name.to_vec())
            .collect();
        assert_eq!(names, vec![b".".to_vec(), b"..".to_vec(), b"hello".to_vec()]);

        ring.push_close(fd, 0).unwrap();
        ring.submit_and_wait().unwrap();
        completions.clear();
        ring.drain_completions(&mut completions);
        assert_eq!(completions[0].result, 0);
        assert_eq!(ring.closes(), 1);
    }

    #[test]
    fn test_bounded_slots_report_full() {
        let mut ring = StubRing::with_slots(StubFs::new(), 1);
        let path = CString::new("x").unwrap();
        ring.push_open(None, &path, 0).unwrap();
        assert_eq!(
            ring.push_open(None, &path, 1),
            Err(PushError::QueueFull)
        );
        ring.submit().unwrap();
        assert!(ring.push_open(None, &path, 1).is_ok());
    }

    #[test]
    fn test_double_close_is_ebadf() {
        let mut ring = StubRing::new(StubFs::new());
        let path = CString::new("r").unwrap();
        ring.push_open(None, &path, 0).unwrap();
        ring.submit().unwrap();
        let mut completions = Vec::new();
        ring.drain_completions(&mut completions);
        let fd = completions[0].result;

        ring.push_close(fd, 1).unwrap();
        ring.push_close(fd, 2).unwrap();
        ring.submit().unwrap();
        completions.clear();
        ring.drain_completions(&mut completions);
        assert_eq!(completions[0].result, 0);
        assert_eq!(completions[1].result, -libc::EBADF);
        assert_eq!(ring.closes(), 1);
    }

    #[test]
    fn test_unsupported_switch() {
        let mut fs = StubFs::new();
        fs.add_file(fs.root(), "unseen");
        let mut ring = StubRing::new(fs);
        ring.set_readdir_unsupported(true);

        let path = CString::new("r").unwrap();
        ring.push_open(None, &path, 0).unwrap();
        ring.submit().unwrap();
        let mut completions = Vec::new();
        ring.drain_completions(&mut completions);
        let fd = completions[0].result;

        let mut buf = vec![0u8; 256];
        // SAFETY: buf outlives the drain below.
        unsafe {
            ring.push_readdir(fd, buf.as_mut_ptr(), buf.len(), false, 0)
                .unwrap();
        }
        ring.submit().unwrap();
        completions.clear();
        ring.drain_completions(&mut completions);
        assert_eq!(completions[0].result, -libc::EINVAL);
    }

    #[test]
    fn test_chunked_reads_resume_at_cursor() {
        let mut fs = StubFs::new();
        for name in ["a", "b", "c"] {
            fs.add_file(fs.root(), name);
        }
        let mut ring = StubRing::new(fs);
        ring.set_entries_per_read(2);

        let path = CString::new("r").unwrap();
        ring.push_open(None, &path, 0).unwrap();
        ring.submit().unwrap();
        let mut completions = Vec::new();
        ring.drain_completions(&mut completions);
        let fd = completions[0].result;

        let mut buf = vec![0u8; 4096];
        let mut all = Vec::new();
        loop {
            // SAFETY: buf outlives each drain.
            unsafe {
                ring.push_readdir(fd, buf.as_mut_ptr(), buf.len(), false, 0)
                    .unwrap();
            }
            ring.submit().unwrap();
            completions.clear();
            ring.drain_completions(&mut completions);
            let read = completions[0].result as usize;
            if read == 0 {
                break;
            }
            for rec in crate::dirent::DirentIter::new(&buf[..read]) {
                all.push(rec.unwrap().name.to_vec());
            }
        }
        assert_eq!(
            all,
            vec![
                b".".to_vec(),
                b"..".to_vec(),
                b"a".to_vec(),
                b"b".to_vec(),
                b"c".to_vec()
            ]
        );
    }
}
