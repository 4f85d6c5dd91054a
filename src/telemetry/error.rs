//! Telemetry error types.

use thiserror::Error;

/// Errors from audit logger setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Could not connect to the local syslog daemon.
    #[error("syslog connection failed: {0}")]
    SyslogConnection(String),

    /// `init_logger` was called twice.
    #[error("audit logger already initialized")]
    AlreadyInitialized,
}
