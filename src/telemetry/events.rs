//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `AGENT_SBX` tag so blocked
//! egress attempts and policy installs can be audited after the fact.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for egress policy enforcement.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A complete egress ruleset was committed to the kernel.
    FirewallApplied {
        /// Chain the rules live in.
        chain: String,
        /// Number of whitelist domains that resolved.
        domains: usize,
        /// IPv4 rule count.
        v4_rules: usize,
        /// IPv6 rule count.
        v6_rules: usize,
    },

    /// A whitelist domain resolved to concrete addresses.
    DomainResolved {
        /// The domain.
        domain: String,
        /// Its currently resolved addresses.
        addresses: Vec<String>,
    },

    /// A whitelist domain could not be resolved; the build continued.
    DomainUnresolved {
        /// The domain.
        domain: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A wildcard pattern was delegated to the proxy layer.
    WildcardDelegated {
        /// The pattern.
        pattern: String,
    },

    /// A proxy instance started serving its segment.
    ProxyStart {
        /// Segment name.
        segment: String,
        /// Listen address.
        listen: String,
        /// Number of filter patterns loaded.
        patterns: usize,
    },

    /// A proxied request was admitted.
    ProxyAllow {
        /// Segment that made the decision.
        segment: String,
        /// Requested hostname.
        host: String,
        /// The pattern that matched.
        pattern: String,
        /// Provenance tier of the matching pattern.
        tier: String,
    },

    /// A proxied request was refused. Expected, normal operation.
    ProxyDeny {
        /// Segment that made the decision.
        segment: String,
        /// Requested hostname.
        host: String,
    },

    /// Static validation found a segment isolation violation.
    SegmentViolation {
        /// Description naming the segments involved.
        detail: String,
    },
}

/// Wrapper for serializing events with a timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
