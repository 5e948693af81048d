//! Supervisor side: signal bridge, spawning seam, and the pool state
//! machine.
//!
//! The control plane is signal-driven. Operators steer a running pool with
//! plain `kill(1)`:
//!
//! ```text
//!   SIGUSR1  add one worker
//!   SIGUSR2  remove one worker (cooperative)
//!   SIGHUP   restart every worker
//!   SIGTERM  graceful shutdown (also SIGINT, SIGQUIT)
//! ```
//!
//! All state lives in [`Supervisor`]; signal handlers only write tag bytes
//! to the self-pipe drained by [`SignalBridge`].

mod pool;
mod signals;
mod spawn;

pub use pool::{DesiredState, Supervisor, SupervisorConfig, WorkerHandle};
pub use signals::{ControlEvent, Intent, SignalBridge};
pub use spawn::{ForkSpawner, Spawn, SpawnedWorker};
