//! Owned kernel pipe pairs, tagged with the edge they belong to.
//!
//! Fan-out scheduling state (`visited`, `bytes_written` per cycle) is kept
//! off this struct, in `reactor::session::FanoutSession`, so `Pipe` stays
//! about transport rather than about scheduling (design note in §9).

use nix::unistd;
use std::os::unix::io::RawFd;

/// A kernel pipe pair, with independently tracked open/closed flags for each
/// end. Closing an end is idempotent at the API level (`close_read`/
/// `close_write` check the flag before calling `close(2)`), which is the
/// "no double-close" property from the testable-properties list.
#[derive(Debug)]
pub struct Pipe {
    pub(crate) read_fd: RawFd,
    pub(crate) write_fd: RawFd,
    pub(crate) read_open: bool,
    pub(crate) write_open: bool,
    pub edge_id: Option<String>,
}

impl Pipe {
    /// Creates a new `O_CLOEXEC` pipe pair. `edge_id` is `None` for a node
    /// output stream (which is not tied to any single edge).
    pub(crate) fn new(edge_id: Option<String>) -> nix::Result<Pipe> {
        let (read_fd, write_fd) = unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;
        Ok(Pipe {
            read_fd,
            write_fd,
            read_open: true,
            write_open: true,
            edge_id,
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    pub fn is_read_open(&self) -> bool {
        self.read_open
    }

    pub fn is_write_open(&self) -> bool {
        self.write_open
    }

    /// Closes the read end, if not already closed. No-op otherwise.
    pub(crate) fn close_read(&mut self) {
        if self.read_open {
            unistd::close(self.read_fd).ok();
            self.read_open = false;
        }
    }

    /// Closes the write end, if not already closed. No-op otherwise.
    pub(crate) fn close_write(&mut self) {
        if self.write_open {
            unistd::close(self.write_fd).ok();
            self.write_open = false;
        }
    }

    /// Marks an end as belonging to the child (after it has been `dup2`'d
    /// onto a standard descriptor and the original is no longer needed in
    /// the parent), without issuing a real `close(2)` twice: the descriptor
    /// table entry is shared until the child execs, so the parent simply
    /// drops its own reference by closing the original fd.
    pub(crate) fn close_in_parent(&mut self, end: PipeEnd) {
        match end {
            PipeEnd::Read => self.close_read(),
            PipeEnd::Write => self.close_write(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.close_read();
        self.close_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent() {
        let mut pipe = Pipe::new(Some("e1".to_string())).unwrap();
        assert!(pipe.is_read_open());
        assert!(pipe.is_write_open());
        pipe.close_read();
        pipe.close_read();
        assert!(!pipe.is_read_open());
        pipe.close_write();
        pipe.close_write();
        assert!(!pipe.is_write_open());
    }

    #[test]
    fn drop_closes_remaining_ends() {
        let pipe = Pipe::new(None).unwrap();
        let read_fd = pipe.read_fd();
        drop(pipe);
        // The fd is now closed; reading from it must fail with EBADF.
        let mut buf = [0u8; 1];
        let err = nix::unistd::read(read_fd, &mut buf).unwrap_err();
        assert_eq!(err, nix::errno::Errno::EBADF);
    }
}
