//! Exit-status analysis for reaped worker processes.
//!
//! The supervisor distinguishes clean from faulted exits only for logging;
//! both feed the same respawn decision.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with status 0.
    Clean,
    /// Exited with a nonzero status code.
    Faulted(i32),
    /// Killed by a signal (including our own SIGKILL escalation).
    Signaled(Signal),
    /// Process has not actually exited.
    StillAlive,
    /// Unrecognized wait status.
    Unknown,
}

impl ExitKind {
    /// Whether this counts as a clean exit.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Human-readable description used in reap logs.
    pub fn description(&self) -> String {
        match self {
            Self::Clean => "exited cleanly".to_string(),
            Self::Faulted(code) => format!("exited with status {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "ended for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Classify a `WaitStatus` from `waitpid`.
pub fn analyze_exit(status: WaitStatus) -> ExitKind {
    match status {
        WaitStatus::Exited(_, 0) => ExitKind::Clean,
        WaitStatus::Exited(_, code) => ExitKind::Faulted(code),
        WaitStatus::Signaled(_, signal, _) => ExitKind::Signaled(signal),
        WaitStatus::StillAlive => ExitKind::StillAlive,
        _ => ExitKind::Unknown,
    }
}
