//! Signal bridge: translates POSIX signals into control-plane events.
//!
//! Uses the self-pipe pattern. Handlers are async-signal-safe: each one
//! writes a single tag byte to a non-blocking pipe and returns. The
//! reconcile loop blocks on the read end via `poll(2)` and performs all real
//! work on its own thread of control.
//!
//! The signal-to-intent table is the documented operator interface:
//!
//! | Signal   | Intent      |
//! |----------|-------------|
//! | SIGHUP   | restart all |
//! | SIGUSR1  | scale up    |
//! | SIGUSR2  | scale down  |
//! | SIGINT   | shutdown    |
//! | SIGQUIT  | shutdown    |
//! | SIGTERM  | shutdown    |
//! | SIGCHLD  | reap        |

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd;

use crate::error::{ForkdError, Result};

/// A pending control-plane command derived from a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    ScaleUp,
    ScaleDown,
    RestartAll,
    Shutdown,
}

/// One event drained from the signal pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// An operator intent, applied in arrival order.
    Intent(Intent),
    /// At least one child has exited and needs reaping.
    ChildExited,
}

/// Signals trapped by the bridge and their tag byte on the pipe.
const TRAPPED: [(Signal, u8); 7] = [
    (Signal::SIGCHLD, b'C'),
    (Signal::SIGHUP, b'H'),
    (Signal::SIGINT, b'I'),
    (Signal::SIGQUIT, b'Q'),
    (Signal::SIGUSR1, b'1'),
    (Signal::SIGUSR2, b'2'),
    (Signal::SIGTERM, b'T'),
];

/// Write end of the self-pipe, shared with the signal handler.
/// -1 while no bridge is installed.
static SIGNAL_PIPE_WR: AtomicI32 = AtomicI32::new(-1);
/// Read end, kept so the child can close it after fork.
static SIGNAL_PIPE_RD: AtomicI32 = AtomicI32::new(-1);

/// The only code that runs in signal-handler context: write one tag byte.
extern "C" fn forward_signal(signo: libc::c_int) {
    let fd = SIGNAL_PIPE_WR.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let tag = match signo {
        libc::SIGCHLD => b'C',
        libc::SIGHUP => b'H',
        libc::SIGINT => b'I',
        libc::SIGQUIT => b'Q',
        libc::SIGUSR1 => b'1',
        libc::SIGUSR2 => b'2',
        libc::SIGTERM => b'T',
        _ => return,
    };
    // Non-blocking write; a full pipe just coalesces the event.
    unsafe {
        libc::write(fd, &tag as *const u8 as *const libc::c_void, 1);
    }
}

/// Installed signal bridge. At most one may exist per process.
pub struct SignalBridge {
    rx: OwnedFd,
    _tx: OwnedFd,
}

impl SignalBridge {
    /// Create the self-pipe and install handlers for all trapped signals.
    ///
    /// Must be called before the first worker is forked so early exits are
    /// not missed.
    pub fn install() -> Result<Self> {
        if SIGNAL_PIPE_WR.load(Ordering::SeqCst) >= 0 {
            return Err(ForkdError::Worker(
                "signal bridge already installed".to_string(),
            ));
        }

        let (rx, tx) = unistd::pipe2(OFlag::O_NONBLOCK)?;
        SIGNAL_PIPE_WR.store(tx.as_raw_fd(), Ordering::SeqCst);
        SIGNAL_PIPE_RD.store(rx.as_raw_fd(), Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::Handler(forward_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for (signal, _) in TRAPPED {
            // Safety: the handler only performs an async-signal-safe write.
            unsafe {
                sigaction(signal, &action).map_err(ForkdError::Signal)?;
            }
        }

        Ok(Self { rx, _tx: tx })
    }

    /// Block until a signal arrives or the timeout expires, then drain the
    /// pipe into an ordered event batch.
    ///
    /// Returns an empty batch on timeout or interruption.
    pub fn wait(&self, timeout: PollTimeout) -> Result<Vec<ControlEvent>> {
        let mut fds = [PollFd::new(self.rx.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(ForkdError::Signal(e)),
        }

        let mut tags = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(&self.rx, &mut buf) {
                Ok(0) => break,
                Ok(n) => tags.extend_from_slice(&buf[..n]),
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ForkdError::Signal(e)),
            }
        }

        Ok(collate(&tags))
    }

    /// Undo the bridge inside a freshly forked child: restore default
    /// dispositions and close the inherited pipe fds.
    ///
    /// The child must not write operator tags into the parent's pipe.
    pub fn reset_in_child() {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for (signal, _) in TRAPPED {
            // Safety: restoring the default disposition.
            unsafe {
                let _ = sigaction(signal, &default);
            }
        }
        let wr = SIGNAL_PIPE_WR.swap(-1, Ordering::SeqCst);
        let rd = SIGNAL_PIPE_RD.swap(-1, Ordering::SeqCst);
        unsafe {
            if wr >= 0 {
                libc::close(wr);
            }
            if rd >= 0 {
                libc::close(rd);
            }
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        // Detach the handler's fd first, then restore defaults.
        SIGNAL_PIPE_WR.store(-1, Ordering::SeqCst);
        SIGNAL_PIPE_RD.store(-1, Ordering::SeqCst);
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for (signal, _) in TRAPPED {
            // Safety: restoring the default disposition.
            unsafe {
                let _ = sigaction(signal, &default);
            }
        }
    }
}

/// Map one tag byte to its event.
fn event_for_tag(tag: u8) -> Option<ControlEvent> {
    match tag {
        b'C' => Some(ControlEvent::ChildExited),
        b'H' => Some(ControlEvent::Intent(Intent::RestartAll)),
        b'1' => Some(ControlEvent::Intent(Intent::ScaleUp)),
        b'2' => Some(ControlEvent::Intent(Intent::ScaleDown)),
        b'I' | b'Q' | b'T' => Some(ControlEvent::Intent(Intent::Shutdown)),
        _ => None,
    }
}

/// Collate a drained batch of tag bytes into an ordered event list.
///
/// Intents keep their arrival order and always precede the (single,
/// coalesced) child-exit event, so a deliberate removal is applied before
/// the removed worker's exit can trigger a spurious respawn.
fn collate(tags: &[u8]) -> Vec<ControlEvent> {
    let mut events = Vec::with_capacity(tags.len());
    let mut child_exited = false;
    for &tag in tags {
        match event_for_tag(tag) {
            Some(ControlEvent::ChildExited) => child_exited = true,
            Some(event) => events.push(event),
            None => {}
        }
    }
    if child_exited {
        events.push(ControlEvent::ChildExited);
    }
    events
}
