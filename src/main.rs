//! agent-sbx binary entry point.
//!
//! Parses the CLI, initializes diagnostic tracing and audit telemetry, then
//! dispatches to the subcommand handler. Audit events go to syslog; tracing
//! goes to stderr; stdout is reserved for command output (`--dry-run`
//! payloads, `check` summaries).

use anyhow::{Context, Result};
use clap::Parser;

use agent_sbx::{cli::Cli, cli_handler, telemetry};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;
    debug!("Parsed CLI arguments: {:?}", cli);

    // Degrades to a null logger on syslog-less hosts; only double
    // initialization is an error.
    telemetry::init_logger().context("Failed to initialize telemetry")?;

    cli_handler::handle_command(cli)
}

/// Initialize the tracing subscriber for diagnostic logging.
///
/// Separate from audit telemetry, which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
