//! Error types for domain resolution.

use thiserror::Error;

/// Why a single domain lookup produced no addresses.
///
/// Resolution errors are always per-domain and non-fatal to the overall
/// IP-set build; they surface as warnings and audit events, never as an
/// aborted startup.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The lookup exceeded the configured per-lookup timeout.
    #[error("lookup timed out")]
    Timeout,

    /// The system resolver returned an error (NXDOMAIN, SERVFAIL, ...).
    #[error("lookup failed: {0}")]
    Lookup(#[from] std::io::Error),
}
