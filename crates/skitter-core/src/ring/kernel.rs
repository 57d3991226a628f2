//! Production ring backend over io_uring (Linux-only).
//!
//! Opens and closes travel through real ring opcodes, batched and flushed
//! the way the `io-uring` crate exposes them. Mainline kernels ship no
//! asynchronous directory-read opcode, so read-directory submissions are
//! serviced through the `getdents64` syscall when pushed and delivered
//! through the same completion stream; the walker sees one uniform
//! delivery order either way. A kernel that rejects the directory read
//! surfaces `-EINVAL` in the completion, which the walker treats as a
//! capability probe, not an error.

use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString};
use std::io;

use io_uring::{IoUring, Probe, opcode, types};

use super::{Completion, DirRing, PushError, RawFd, RingError};

/// io_uring-backed implementation of [`DirRing`].
pub struct KernelRing {
    ring: IoUring,
    /// Path argument of each in-flight open. The kernel reads the pointer
    /// when it consumes the SQE, so the string must stay alive until the
    /// completion for its token is drained.
    open_paths: HashMap<u64, CString>,
    /// Completions serviced inline (directory reads), pending delivery.
    serviced: VecDeque<Completion>,
}

impl KernelRing {
    /// Create a ring with the given submission-queue depth and verify the
    /// opcodes this backend relies on.
    pub fn new(entries: u32) -> Result<Self, RingError> {
        let ring = IoUring::new(entries).map_err(RingError::Create)?;

        let mut probe = Probe::new();
        ring.submitter()
            .register_probe(&mut probe)
            .map_err(RingError::Create)?;
        if !probe.is_supported(opcode::OpenAt::CODE) {
            return Err(RingError::MissingOpcode("openat"));
        }
        if !probe.is_supported(opcode::Close::CODE) {
            return Err(RingError::MissingOpcode("close"));
        }

        Ok(Self {
            ring,
            open_paths: HashMap::new(),
            serviced: VecDeque::new(),
        })
    }

    fn map_submit_err(err: io::Error) -> RingError {
        if err.raw_os_error() == Some(libc::EBUSY) {
            RingError::Busy
        } else {
            RingError::Submit(err)
        }
    }
}

impl DirRing for KernelRing {
    fn push_open(
        &mut self,
        parent_fd: Option<RawFd>,
        path: &CStr,
        token: u64,
    ) -> Result<(), PushError> {
        let path = path.to_owned();
        let dirfd = parent_fd.unwrap_or(libc::AT_FDCWD);
        let sqe = opcode::OpenAt::new(types::Fd(dirfd), path.as_ptr())
            .flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
            .build()
            .user_data(token);

        // SAFETY: the path pointer stays valid until the CQE for `token`
        // is drained; `open_paths` owns the string for that span.
        unsafe {
            self.ring
                .submission()
                .push(&sqe)
                .map_err(|_| PushError::QueueFull)?;
        }
        self.open_paths.insert(token, path);
        Ok(())
    }

    unsafe fn push_readdir(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        rewind: bool,
        token: u64,
    ) -> Result<(), PushError> {
        // SAFETY: fd is an open directory descriptor owned by the caller;
        // buf/len form a writable span per this method's contract.
        let res = unsafe {
            if rewind {
                libc::lseek(fd, 0, libc::SEEK_SET);
            }
            libc::syscall(libc::SYS_getdents64, fd, buf, len as libc::c_uint)
        };
        let result = if res < 0 {
            -(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
        } else {
            res as i32
        };
        self.serviced.push_back(Completion { token, result });
        Ok(())
    }

    fn push_close(&mut self, fd: RawFd, token: u64) -> Result<(), PushError> {
        let sqe = opcode::Close::new(types::Fd(fd)).build().user_data(token);
        // SAFETY: a close SQE carries no borrowed memory.
        unsafe {
            self.ring
                .submission()
                .push(&sqe)
                .map_err(|_| PushError::QueueFull)?;
        }
        Ok(())
    }

    fn submit(&mut self) -> Result<usize, RingError> {
        self.ring.submit().map_err(Self::map_submit_err)
    }

    fn submit_and_wait(&mut self) -> Result<(), RingError> {
        if self.serviced.is_empty() {
            self.ring
                .submit_and_wait(1)
                .map_err(Self::map_submit_err)?;
        } else {
            // A serviced completion is already deliverable; flush without
            // blocking so ring-side work keeps moving.
            match self.ring.submit() {
                Ok(_) => {}
                Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {}
                Err(err) => return Err(RingError::Submit(err)),
            }
        }
        Ok(())
    }

    fn drain_completions(&mut self, out: &mut Vec<Completion>) {
        while let Some(completion) = self.serviced.pop_front() {
            out.push(completion);
        }
        for cqe in self.ring.completion() {
            let token = cqe.user_data();
            self.open_paths.remove(&token);
            out.push(Completion {
                token,
                result: cqe.result(),
            });
        }
    }
}
