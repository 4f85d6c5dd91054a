//! Telemetry and audit logging.
//!
//! Two separate concerns, never mixed:
//!
//! - **Audit logging** (syslog): security-relevant events — policy installs,
//!   resolution outcomes, proxy allow/deny decisions — as structured JSON
//!   under the `AGENT_SBX` tag for SIEM ingestion.
//! - **Diagnostic logging** (`tracing`): development and operational logs to
//!   stderr.
//!
//! # Event format
//!
//! ```json
//! {"ts":"2026-08-05T14:32:01Z","event":"proxy_deny","segment":"workspace","host":"evil.example"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::AuditEvent;
pub use syslog::{AuditLogger, SYSLOG_TAG, audit, init_logger};
