//! Kernel-level egress enforcement.
//!
//! This module installs the default-deny packet-filter policy derived from
//! the resolved address set. The design is build-then-commit: a complete
//! [`Ruleset`] value is staged in memory, rendered to an `iptables-restore`
//! payload, and swapped in as a single kernel transaction. Partial
//! application is a safety bug, so there is no incremental path.
//!
//! Wildcard whitelist patterns are not represented here at all — address
//! filters cannot match hostnames. The proxy filter layer enforces those.

mod engine;
mod error;
mod ruleset;

pub use engine::{FirewallEngine, InstallSummary};
pub use error::FirewallError;
pub use ruleset::{DenyAction, Family, Proto, Rule, Ruleset};
