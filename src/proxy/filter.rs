//! Hostname filtering for one proxy instance.
//!
//! A [`HostFilter`] is the read-only structure a proxy instance consults for
//! every request: the exact patterns in a hash set, the wildcards in a scan
//! list. It is built once at process start from that instance's own merged
//! whitelist and owned exclusively by the instance — two segments never share
//! a filter.
//!
//! The filter is deliberately allow-or-deny only: anything not matching some
//! pattern is refused. It is therefore at least as restrictive as the
//! address-level firewall for the traffic it mediates, and strictly more
//! restrictive for hostnames that happen to share an address with a
//! whitelisted domain.

use crate::allowlist::{DomainPattern, MergedList, SourceTier};
use std::collections::HashMap;

/// Outcome of a filter lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// The hostname matched a pattern.
    Allow {
        /// The matching pattern text.
        pattern: String,
        /// Provenance tier of the matching pattern.
        tier: SourceTier,
    },
    /// No pattern matched.
    Deny,
}

/// Immutable per-instance hostname filter.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    /// Exact patterns, keyed by normalized host.
    exact: HashMap<String, SourceTier>,
    /// Wildcard patterns, scanned in order.
    wildcards: Vec<(DomainPattern, SourceTier)>,
}

impl HostFilter {
    /// Build a filter from a merged whitelist.
    pub fn from_merged(merged: &MergedList) -> Self {
        let mut exact = HashMap::new();
        let mut wildcards = Vec::new();

        for pattern in merged.patterns() {
            let tier = merged
                .tier_of(pattern)
                .unwrap_or(SourceTier::Builtin);
            if pattern.is_wildcard() {
                wildcards.push((pattern.clone(), tier));
            } else {
                exact.insert(pattern.as_str().to_string(), tier);
            }
        }

        Self { exact, wildcards }
    }

    /// Evaluate a hostname. Matching is case-insensitive; exact patterns win
    /// before wildcards, though the decision is the same either way.
    pub fn evaluate(&self, hostname: &str) -> FilterDecision {
        let host = hostname.to_lowercase();

        if let Some(tier) = self.exact.get(&host) {
            return FilterDecision::Allow {
                pattern: host,
                tier: *tier,
            };
        }

        for (pattern, tier) in &self.wildcards {
            if pattern.matches(&host) {
                return FilterDecision::Allow {
                    pattern: pattern.as_str().to_string(),
                    tier: *tier,
                };
            }
        }

        FilterDecision::Deny
    }

    /// Total number of patterns in this filter.
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    /// Whether the filter admits nothing.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::{DomainSource, merge};

    fn filter(lines: &[&str]) -> HostFilter {
        let merged = merge(&[DomainSource {
            name: "test".to_string(),
            tier: SourceTier::Project,
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }]);
        HostFilter::from_merged(&merged)
    }

    #[test]
    fn test_exact_allow() {
        let f = filter(&["github.com"]);
        assert!(matches!(
            f.evaluate("github.com"),
            FilterDecision::Allow { .. }
        ));
        assert_eq!(f.evaluate("api.github.com"), FilterDecision::Deny);
    }

    #[test]
    fn test_wildcard_allow() {
        let f = filter(&["*.pypi.org"]);

        match f.evaluate("files.pypi.org") {
            FilterDecision::Allow { pattern, .. } => assert_eq!(pattern, "*.pypi.org"),
            FilterDecision::Deny => panic!("Expected wildcard match"),
        }
        // The bare base domain is not covered by the wildcard.
        assert_eq!(f.evaluate("pypi.org"), FilterDecision::Deny);
    }

    #[test]
    fn test_unmatched_host_denied() {
        let f = filter(&["github.com", "*.pypi.org"]);
        assert_eq!(f.evaluate("evil.example"), FilterDecision::Deny);
        assert_eq!(f.evaluate("fakepypi.org"), FilterDecision::Deny);
    }

    #[test]
    fn test_case_insensitive() {
        let f = filter(&["github.com"]);
        assert!(matches!(
            f.evaluate("GitHub.COM"),
            FilterDecision::Allow { .. }
        ));
    }

    #[test]
    fn test_decision_carries_tier() {
        let merged = merge(&[
            DomainSource {
                name: "builtin".to_string(),
                tier: SourceTier::Builtin,
                lines: vec!["github.com".to_string()],
            },
            DomainSource {
                name: "user".to_string(),
                tier: SourceTier::User,
                lines: vec!["internal.corp.example".to_string()],
            },
        ]);
        let f = HostFilter::from_merged(&merged);

        match f.evaluate("internal.corp.example") {
            FilterDecision::Allow { tier, .. } => assert_eq!(tier, SourceTier::User),
            FilterDecision::Deny => panic!("Expected allow"),
        }
    }

    #[test]
    fn test_empty_filter_denies_everything() {
        let f = filter(&[]);
        assert!(f.is_empty());
        assert_eq!(f.evaluate("github.com"), FilterDecision::Deny);
    }
}
