//! Worker process spawning.
//!
//! The [`Spawn`] trait is the seam between the supervisor's state machine
//! and the operating system: production code forks, unit tests substitute a
//! fake. Forking (rather than spawn-and-exec) keeps the caller's work unit a
//! plain closure over the parent's address space.

use std::os::fd::OwnedFd;
use std::process;

use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, ForkResult, Pid};
use tracing::debug;

use super::signals::SignalBridge;
use crate::error::Result;
use crate::worker::{WorkerContext, WorkerFactory, WorkerRunner};

/// A freshly spawned worker process as seen from the parent.
pub struct SpawnedWorker {
    /// Child process id.
    pub pid: Pid,
    /// Write end of the worker's stop pipe.
    pub stop_tx: OwnedFd,
}

/// Spawning seam for the supervisor.
pub trait Spawn {
    /// Start one worker process of the given generation.
    fn spawn(&mut self, generation: u32) -> Result<SpawnedWorker>;

    /// Forcefully terminate a worker that outlived its grace period.
    fn force_kill(&mut self, pid: Pid) -> Result<()>;
}

/// Production spawner: `fork(2)` plus a per-worker stop pipe.
pub struct ForkSpawner {
    factory: WorkerFactory,
    context: WorkerContext,
}

impl ForkSpawner {
    /// Create a spawner for the given work-unit factory and context.
    pub fn new(factory: WorkerFactory, context: WorkerContext) -> Self {
        Self { factory, context }
    }
}

impl Spawn for ForkSpawner {
    fn spawn(&mut self, generation: u32) -> Result<SpawnedWorker> {
        // Both ends non-blocking: the child peeks between slices, the parent
        // writes a single stop byte and never waits on the pipe.
        let (stop_rx, stop_tx) = unistd::pipe2(OFlag::O_NONBLOCK)?;

        // Safety: the child continues with a single thread and only calls
        // fork-safe operations before taking over as the worker loop.
        match unsafe { unistd::fork() }? {
            ForkResult::Parent { child } => {
                drop(stop_rx);
                Ok(SpawnedWorker {
                    pid: child,
                    stop_tx,
                })
            }
            ForkResult::Child => {
                drop(stop_tx);
                SignalBridge::reset_in_child();
                debug!(pid = %unistd::getpid(), generation, "worker running");

                let worker = (self.factory)(&self.context);
                let code = WorkerRunner::new(stop_rx).run(worker);

                debug!(pid = %unistd::getpid(), "worker ending");
                process::exit(code);
            }
        }
    }

    fn force_kill(&mut self, pid: Pid) -> Result<()> {
        signal::kill(pid, Signal::SIGKILL)?;
        Ok(())
    }
}
