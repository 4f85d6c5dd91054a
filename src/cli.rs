//! Command-line interface definitions.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Egress allowlist enforcement for sandboxed AI coding agents.
///
/// agent-sbx installs a default-deny packet-filter policy derived from a
/// layered domain whitelist and runs per-segment filtering proxies that
/// re-check every outbound request by hostname.
#[derive(Parser, Debug)]
#[command(name = "agent-sbx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to an additional config file, merged with highest priority.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for agent-sbx.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and atomically install the egress firewall ruleset.
    ///
    /// Aggregates the whitelist, resolves every exact domain, stages the
    /// complete ruleset, and commits it in one swap. Exits non-zero if the
    /// packet-filter tooling is missing or unprivileged.
    Firewall {
        /// Additional whitelist file (repeatable), merged at the project tier.
        #[arg(short = 'w', long = "whitelist", value_name = "PATH")]
        whitelist: Vec<PathBuf>,

        /// Extra allowed domain for this run (repeatable), merged at the
        /// user tier.
        #[arg(short = 'd', long = "allow-domain", value_name = "DOMAIN")]
        allow_domains: Vec<String>,

        /// Print the staged restore payloads instead of committing them.
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Remove the egress chain and its OUTPUT jump, then exit.
        #[arg(
            long = "uninstall",
            conflicts_with_all = ["whitelist", "allow_domains", "dry_run"]
        )]
        uninstall: bool,
    },

    /// Run the filtering proxy for one network segment.
    ///
    /// The proxy binds the segment's configured address, builds its filter
    /// from that segment's whitelist sources, and serves until interrupted.
    Proxy {
        /// Name of the segment to serve (a `[segments.NAME]` table).
        #[arg(long = "segment", value_name = "NAME")]
        segment: String,
    },

    /// Statically validate segment isolation in the merged configuration.
    ///
    /// Exits non-zero with one diagnostic per violation.
    Check,
}
