//! forkd - signal-driven worker pool supervisor

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use forkd::cli::Cli;
use forkd::logging::{self, LogConfig};
use forkd::supervisor::{Supervisor, SupervisorConfig};
use forkd::worker::WorkerContext;
use forkd::WorkerRegistry;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut log_config = LogConfig::new()
        .with_format(cli.log_format)
        .with_env_overrides();
    if let Some(level) = logging::parse_level(&cli.log_level) {
        log_config = log_config.with_level(level);
    }
    if let Some(ref path) = cli.log_file {
        log_config = log_config.with_file(path.clone());
    }
    logging::init(log_config);

    // Resolve the spec before any fork so a typo fails fast.
    let registry = WorkerRegistry::with_builtins();
    let factory = registry
        .resolve(&cli.worker_spec)
        .with_context(|| format!("available specs: {}", registry.specs().join(", ")))?;

    let config = SupervisorConfig {
        grace_period: cli.grace_period(),
        ..SupervisorConfig::default()
    };
    let context = WorkerContext::new(cli.worker_args.clone());

    let mut pool = Supervisor::new(factory, context, config);
    pool.run(cli.num_workers)
        .context("supervisor terminated abnormally")?;

    Ok(())
}
