//! agent-sbx: egress allowlist enforcement for sandboxed AI coding agents
//!
//! This crate keeps a containerized coding agent inside a curated set of
//! network destinations, enforced at two independent layers:
//!
//! - **Kernel layer**: a default-deny packet-filter policy allowing only the
//!   addresses the whitelisted domains currently resolve to (plus loopback
//!   and DNS), staged as a complete ruleset and committed atomically.
//! - **Application layer**: a filtering forward proxy per network segment
//!   that re-checks every request's hostname against the same whitelist,
//!   including wildcard patterns the packet filter cannot express.
//!
//! The two layers consume the same aggregated source-of-truth list but share
//! no runtime state, and separate segments (e.g. the interactive workspace
//! and the Docker-in-Docker build network) run isolated proxy instances with
//! strictly disjoint configuration.
//!
//! # Architecture
//!
//! - **Allowlist**: tiered source aggregation into one merged pattern list
//! - **Resolver**: bounded concurrent DNS resolution into an address set
//! - **Firewall**: staged ruleset values committed via `iptables-restore`
//! - **Proxy**: per-segment hyper-based CONNECT/HTTP filtering proxy
//! - **Config**: hierarchical TOML with static segment-isolation validation
//! - **Telemetry**: structured syslog audit events, tracing diagnostics

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allowlist;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod firewall;
pub mod proxy;
pub mod resolver;
pub mod telemetry;
