//! forkd - a signal-driven worker pool over forked processes.
//!
//! A supervisor process forks N workers, each running a caller-supplied
//! [`Worker`](worker::Worker) one slice at a time. Operators steer the
//! running pool with signals: SIGUSR1 adds a worker, SIGUSR2 removes one
//! cooperatively, SIGHUP restarts the whole pool, and SIGINT/SIGQUIT/SIGTERM
//! shut it down gracefully. Crashed workers are reaped and respawned.
//!
//! ```no_run
//! use std::sync::Arc;
//! use forkd::supervisor::{Supervisor, SupervisorConfig};
//! use forkd::worker::{StepOutcome, Worker, WorkerContext};
//!
//! struct Tick;
//!
//! impl Worker for Tick {
//!     fn step(&mut self) -> forkd::Result<StepOutcome> {
//!         println!("tick");
//!         Ok(StepOutcome::Continue)
//!     }
//! }
//!
//! fn main() -> forkd::Result<()> {
//!     let mut pool = Supervisor::new(
//!         Arc::new(|_ctx| Box::new(Tick)),
//!         WorkerContext::default(),
//!         SupervisorConfig::default(),
//!     );
//!     pool.run(4)
//! }
//! ```

pub mod cli;
pub mod error;
pub mod logging;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use error::{ForkdError, Result};
pub use registry::WorkerRegistry;
