//! Command-line interface definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::logging::LogFormat;

/// Process-level worker pool supervisor, steered by signals.
#[derive(Parser, Debug)]
#[command(name = "forkd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Worker spec to run, in `module:function` form (e.g. `builtin:tick`).
    pub worker_spec: String,

    /// Arguments forwarded to each worker.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Number of workers to fork at startup.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub num_workers: usize,

    /// Seconds a draining worker may run before SIGKILL.
    #[arg(long, env = "FORKD_GRACE_PERIOD", default_value_t = 10)]
    pub grace_period: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long, env = "FORKD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "FORKD_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write logs to this file.
    #[arg(long, env = "FORKD_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }
}
