//! Worker-side types: the cooperative work unit, its in-child runner, and
//! exit-status analysis.
//!
//! A worker is a child process executing caller-supplied logic with periodic
//! voluntary yield points. The yield points are explicit: the work unit
//! exposes [`Worker::step`], one call per discrete slice of work, and the
//! runner checks the supervisor's stop request between calls. A slice in
//! flight always completes; nothing is abandoned half-done.
//!
//! # Architecture
//!
//! ```text
//!            ┌────────────────┐
//!            │   Supervisor   │
//!            │    (parent)    │
//!            └───────┬────────┘
//!                    │ stop pipe ("Q" byte)
//!            ┌───────▼────────┐
//!            │  WorkerRunner  │  per forked child
//!            │  step / check  │
//!            └───────┬────────┘
//!                    │
//!            ┌───────▼────────┐
//!            │ impl Worker    │  caller-supplied work unit
//!            └────────────────┘
//! ```

pub mod builtin;
mod exit;
mod runner;

pub use exit::{ExitKind, analyze_exit};
pub use runner::WorkerRunner;
pub(crate) use runner::STOP_BYTE;

use std::sync::Arc;

use crate::error::Result;

/// Outcome of one work slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More work remains; call `step` again.
    Continue,
    /// The work unit is finished; the worker exits cleanly.
    Complete,
}

/// A unit of work driven by the in-child runner.
///
/// Each `step` call is one voluntary yield point: do a discrete slice of
/// work and return. Long-running logic should keep slices short so stop
/// requests are observed promptly.
pub trait Worker {
    /// Perform one slice of work.
    ///
    /// An error terminates only this worker process; the supervisor logs the
    /// faulted exit and respawns unless the worker was draining.
    fn step(&mut self) -> Result<StepOutcome>;
}

/// Per-worker startup context, visible inside each worker process.
#[derive(Debug, Clone, Default)]
pub struct WorkerContext {
    /// Argument vector forwarded from the CLI (everything after the worker
    /// spec) or supplied by the embedding caller.
    pub worker_args: Vec<String>,
}

impl WorkerContext {
    /// Create a context with the given argument vector.
    pub fn new(worker_args: Vec<String>) -> Self {
        Self { worker_args }
    }
}

/// Constructor for work units, invoked inside each freshly forked child.
pub type WorkerFactory = Arc<dyn Fn(&WorkerContext) -> Box<dyn Worker> + Send + Sync>;
