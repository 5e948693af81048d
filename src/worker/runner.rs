//! In-child worker loop.
//!
//! Drives the caller's work unit one slice at a time, peeking at the stop
//! pipe between slices. The peek is a non-blocking read: the supervisor
//! writes a single stop byte to request a cooperative exit, and a closed
//! pipe (EOF) is treated the same way so orphaned workers wind down.

use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::unistd;
use tracing::{debug, error};

use super::{StepOutcome, Worker};

/// Byte written by the supervisor to request a cooperative stop.
pub(crate) const STOP_BYTE: u8 = b'Q';

/// Drives a work unit inside a forked child until it completes, is asked to
/// stop, or fails.
pub struct WorkerRunner {
    /// Read end of the stop pipe (non-blocking).
    stop_rx: OwnedFd,
}

impl WorkerRunner {
    /// Create a runner around the read end of the worker's stop pipe.
    ///
    /// The fd must be non-blocking; the supervisor creates it with
    /// `O_NONBLOCK` set.
    pub fn new(stop_rx: OwnedFd) -> Self {
        Self { stop_rx }
    }

    /// Run the work unit to completion.
    ///
    /// Returns the process exit code: 0 for a clean exit (stop requested or
    /// work complete), 1 if a slice failed.
    pub fn run(&self, mut worker: Box<dyn Worker>) -> i32 {
        loop {
            if self.stop_requested() {
                debug!("stop requested, worker exiting");
                return 0;
            }

            match worker.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Complete) => {
                    debug!("work unit complete, worker exiting");
                    return 0;
                }
                Err(e) => {
                    error!(error = %e, "worker slice failed");
                    return 1;
                }
            }
        }
    }

    /// Non-blocking peek at the stop pipe.
    ///
    /// Any byte or EOF means stop; EAGAIN means keep working.
    fn stop_requested(&self) -> bool {
        let mut buf = [0u8; 1];
        loop {
            match unistd::read(&self.stop_rx, &mut buf) {
                Ok(0) => return true, // EOF: supervisor is gone
                Ok(_) => {
                    if buf[0] != STOP_BYTE {
                        debug!(byte = buf[0], "unexpected byte on stop pipe");
                    }
                    return true;
                }
                Err(Errno::EAGAIN) => return false,
                Err(Errno::EINTR) => continue,
                Err(_) => return true,
            }
        }
    }
}
