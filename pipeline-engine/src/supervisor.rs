//! Resource supervisor: owns the process-wide shared sink and the signalfd
//! used to integrate `SIGCHLD`/`SIGINT` into the reactor's `select` loop.
//!
//! The teacher models process-wide-looking resources (e.g. `jail_common`'s
//! `ZygoteInfo`) as ordinary owned structs released on `Drop` rather than as
//! real globals; `SharedSink` and `SignalSource` follow the same shape (§9:
//! "the shared null-device fd is not a global; it is a resource acquired by
//! `Supervisor::new` at startup and passed by reference").

use nix::{
    fcntl::OFlag,
    sys::{
        signal::{SigSet, Signal},
        signalfd::{SfdFlags, SignalFd},
    },
};
use std::os::unix::io::RawFd;

/// The process-wide write-only descriptor to `/dev/null`, used solely as
/// the target of reclamation splices (§3). Opened once at startup, closed
/// once at teardown.
pub(crate) struct SharedSink {
    fd: RawFd,
}

impl SharedSink {
    /// Aborts the process (§7) if `/dev/null` cannot be opened: without the
    /// shared sink there is no way to run the reactor loop at all.
    pub(crate) fn open() -> SharedSink {
        let fd = nix::fcntl::open(
            "/dev/null",
            OFlag::O_WRONLY | OFlag::O_CLOEXEC,
            nix::sys::stat::Mode::empty(),
        )
        .unwrap_or_else(|cause| crate::error::fatal(format!("failed to open shared sink: {}", cause)));
        SharedSink { fd }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for SharedSink {
    fn drop(&mut self) {
        nix::unistd::close(self.fd).ok();
    }
}

/// Watches `SIGCHLD` and `SIGINT` through one `signalfd`, dispatched
/// synchronously on the reactor's loop thread (§9: "integrated into the
/// event loop via a `signalfd` rather than async-signal-safe C-style
/// handlers, eliminating reentrancy concerns, per the teacher's own
/// `run_loop_legacy` precedent").
pub(crate) struct SignalSource {
    fd: SignalFd,
}

impl SignalSource {
    /// Aborts the process (§7) if signals can't be blocked or the signalfd
    /// can't be created: without it the reactor has no way to observe
    /// `SIGCHLD`/`SIGINT` and would hang forever instead of running at all.
    pub(crate) fn install() -> SignalSource {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.add(Signal::SIGINT);
        mask.thread_block()
            .unwrap_or_else(|cause| crate::error::fatal(format!("failed to block signals: {}", cause)));
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC | SfdFlags::SFD_NONBLOCK)
            .unwrap_or_else(|cause| crate::error::fatal(format!("failed to create signalfd: {}", cause)));
        SignalSource { fd }
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.fd.as_raw_fd()
    }

    /// Drains every pending signal on the fd, returning which kinds fired.
    /// Signal delivery coalesces, so a single readable event on the
    /// signalfd may represent any number of underlying `SIGCHLD`s.
    pub(crate) fn drain(&mut self) -> SignalsFired {
        let mut fired = SignalsFired::default();
        loop {
            match self.fd.read_signal() {
                Ok(Some(info)) => match info.ssi_signo as i32 {
                    x if x == Signal::SIGCHLD as i32 => fired.child_exit = true,
                    x if x == Signal::SIGINT as i32 => fired.interrupt = true,
                    _ => {}
                },
                Ok(None) => break,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(_) => break,
            }
        }
        fired
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub(crate) struct SignalsFired {
    pub(crate) child_exit: bool,
    pub(crate) interrupt: bool,
}
