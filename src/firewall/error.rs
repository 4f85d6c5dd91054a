//! Error types for firewall rule installation.

use thiserror::Error;

/// Errors from staging or committing the egress ruleset.
///
/// Capability problems (missing binary, missing privilege) are fatal by
/// design: the engine aborts before any partial ruleset is committed and
/// never degrades to an allow-all policy.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// A required packet-filter binary is not on PATH.
    #[error(
        "{binary} not found; install the iptables userspace tools or run \
         inside an image that provides them"
    )]
    MissingBinary {
        /// The binary that could not be found.
        binary: String,
    },

    /// The process lacks the privilege to mutate the filter table.
    #[error(
        "{binary} cannot modify the filter table ({detail}); run with \
         CAP_NET_ADMIN or as root"
    )]
    InsufficientPrivilege {
        /// The binary that was refused.
        binary: String,
        /// First line of the underlying error output.
        detail: String,
    },

    /// A command could not be spawned.
    #[error("failed to run '{cmd}': {source}")]
    CommandFailed {
        /// The command line that failed to spawn.
        cmd: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A command ran but exited non-zero.
    #[error("'{cmd}' failed: {stderr}")]
    CommandError {
        /// The command line that failed.
        cmd: String,
        /// Captured standard error output.
        stderr: String,
    },
}
