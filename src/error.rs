//! Error types for forkd.

use thiserror::Error;

/// Main error type for forkd.
#[derive(Error, Debug)]
pub enum ForkdError {
    #[error("Unknown worker spec '{0}'. Worker specs take the form 'module:function' and must be registered.")]
    WorkerSpec(String),

    #[error("Invalid worker spec '{0}': expected 'module:function'")]
    InvalidWorkerSpec(String),

    #[error("Failed to fork worker process after {attempts} attempts: {source}")]
    ForkExhausted { attempts: u32, source: nix::Error },

    #[error("Signal setup failed: {0}")]
    Signal(nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias for forkd operations.
pub type Result<T> = std::result::Result<T, ForkdError>;
