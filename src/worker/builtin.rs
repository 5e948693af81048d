//! Built-in demo workers registered by the forkd binary.
//!
//! These give the CLI resolvable worker specs out of the box and serve as
//! reference implementations of the [`Worker`](super::Worker) contract:
//!
//! - `builtin:tick` — logs a tick each slice, runs until drained.
//!   Optional first worker arg: slice interval in milliseconds (default 50).
//! - `builtin:batch` — runs a fixed number of slices, then completes.
//!   Optional first worker arg: slice count (default 100).

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{StepOutcome, Worker, WorkerContext};
use crate::error::Result;

const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
const DEFAULT_BATCH_SLICES: usize = 100;

/// Endless worker: one tick per slice until asked to stop.
pub struct TickWorker {
    interval: Duration,
    ticks: u64,
}

impl TickWorker {
    /// Build from a worker context; first arg is the interval in ms.
    pub fn from_context(ctx: &WorkerContext) -> Self {
        let interval_ms = ctx
            .worker_args
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        Self {
            interval: Duration::from_millis(interval_ms),
            ticks: 0,
        }
    }
}

impl Worker for TickWorker {
    fn step(&mut self) -> Result<StepOutcome> {
        thread::sleep(self.interval);
        self.ticks += 1;
        debug!(tick = self.ticks, "tick");
        Ok(StepOutcome::Continue)
    }
}

/// Finite worker: a fixed number of slices, then a normal self-completion.
pub struct BatchWorker {
    remaining: usize,
}

impl BatchWorker {
    /// Build from a worker context; first arg is the slice count.
    pub fn from_context(ctx: &WorkerContext) -> Self {
        let slices = ctx
            .worker_args
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BATCH_SLICES);
        Self { remaining: slices }
    }
}

impl Worker for BatchWorker {
    fn step(&mut self) -> Result<StepOutcome> {
        if self.remaining == 0 {
            info!("batch complete");
            return Ok(StepOutcome::Complete);
        }
        self.remaining -= 1;
        thread::sleep(Duration::from_millis(10));
        Ok(StepOutcome::Continue)
    }
}
