//! Cross-module properties of the egress enforcement pipeline.
//!
//! These tests exercise the public library API the way the firewall build
//! and the proxy instances compose it, with resolved address sets
//! constructed directly so nothing here depends on live DNS or privileges.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use agent_sbx::allowlist::{DomainSource, SourceTier, merge};
use agent_sbx::firewall::{DenyAction, Family, Rule, Ruleset};
use agent_sbx::proxy::{FilterDecision, HostFilter};
use agent_sbx::resolver::ResolvedAddressSet;

fn source(name: &str, tier: SourceTier, lines: &[&str]) -> DomainSource {
    DomainSource {
        name: name.to_string(),
        tier,
        lines: lines.iter().map(|s| s.to_string()).collect(),
    }
}

const A1: IpAddr = IpAddr::V4(Ipv4Addr::new(140, 82, 121, 3));
const A2: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 99));
const DNS: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));

/// The §8 core scenario: {github.com, *.pypi.org} with github.com -> A1.
fn scenario() -> (Ruleset, HostFilter) {
    let merged = merge(&[source(
        "project",
        SourceTier::Project,
        &["github.com", "*.pypi.org"],
    )]);

    let mut resolved = ResolvedAddressSet::default();
    resolved.insert("github.com", [A1]);

    let ruleset = Ruleset::build(&resolved, &[DNS], "SBX-EGRESS", DenyAction::Reject);
    let filter = HostFilter::from_merged(&merged);
    (ruleset, filter)
}

#[test]
fn whitelisted_domain_admitted_by_both_layers() {
    let (ruleset, filter) = scenario();

    // Firewall: the resolved address has an accept rule.
    assert!(
        ruleset
            .rules(Family::V4)
            .contains(&Rule::AllowAddress { addr: A1 })
    );

    // Proxy: the hostname is admitted.
    assert!(matches!(
        filter.evaluate("github.com"),
        FilterDecision::Allow { .. }
    ));
}

#[test]
fn unrelated_address_refused_by_firewall() {
    let (ruleset, _) = scenario();

    let rules = ruleset.rules(Family::V4);
    assert!(!rules.contains(&Rule::AllowAddress { addr: A2 }));
    // The terminal deny catches everything without an accept.
    assert!(matches!(rules.last(), Some(Rule::Deny { .. })));
}

#[test]
fn wildcard_admitted_by_proxy_not_firewall() {
    let (ruleset, filter) = scenario();

    // files.pypi.org matches *.pypi.org at the proxy layer.
    match filter.evaluate("files.pypi.org") {
        FilterDecision::Allow { pattern, .. } => assert_eq!(pattern, "*.pypi.org"),
        FilterDecision::Deny => panic!("Expected wildcard admission"),
    }

    // The wildcard contributed nothing to the address rules: only A1 and the
    // fixed allowances are present.
    let address_rules = ruleset
        .rules(Family::V4)
        .iter()
        .filter(|r| matches!(r, Rule::AllowAddress { .. }))
        .count();
    assert_eq!(address_rules, 1);
}

#[test]
fn unknown_host_denied_by_proxy() {
    let (_, filter) = scenario();
    assert_eq!(filter.evaluate("evil.example"), FilterDecision::Deny);
}

#[test]
fn proxy_is_at_least_as_restrictive_as_firewall() {
    let (ruleset, filter) = scenario();

    // A hostile hostname that happens to resolve to a whitelisted address
    // would pass the packet filter (it only sees A1) but must still be
    // refused by the proxy, which sees the hostname.
    assert!(
        ruleset
            .rules(Family::V4)
            .contains(&Rule::AllowAddress { addr: A1 })
    );
    assert_eq!(filter.evaluate("evil.example"), FilterDecision::Deny);

    // And every hostname the proxy admits is backed by a whitelist pattern,
    // so the proxy never widens the policy.
    assert!(matches!(
        filter.evaluate("github.com"),
        FilterDecision::Allow { .. }
    ));
}

#[test]
fn rebuilding_from_unchanged_inputs_is_idempotent() {
    let (first_rules, _) = scenario();
    let (second_rules, _) = scenario();

    assert_eq!(first_rules, second_rules);
    assert_eq!(
        first_rules.restore_payload(Family::V4),
        second_rules.restore_payload(Family::V4)
    );
}

#[test]
fn fixed_allowances_survive_empty_whitelist() {
    let empty = ResolvedAddressSet::default();
    let ruleset = Ruleset::build(&empty, &[DNS], "SBX-EGRESS", DenyAction::Reject);

    let rules = ruleset.rules(Family::V4);
    assert!(rules.contains(&Rule::AllowLoopback));
    assert!(rules.iter().any(|r| matches!(r, Rule::AllowDns { .. })));
    assert!(matches!(rules.last(), Some(Rule::Deny { .. })));
}

#[test]
fn user_entry_survives_builtin_removal() {
    // The domain is absent from the builtin source but present in the user
    // source; it must still be admitted.
    let merged = merge(&[
        source("builtin", SourceTier::Builtin, &["github.com"]),
        source("user", SourceTier::User, &["internal.corp.example"]),
    ]);
    let filter = HostFilter::from_merged(&merged);

    match filter.evaluate("internal.corp.example") {
        FilterDecision::Allow { tier, .. } => assert_eq!(tier, SourceTier::User),
        FilterDecision::Deny => panic!("User entry must be admitted"),
    }
}

#[test]
fn malformed_line_in_one_source_does_not_block_others() {
    let merged = merge(&[
        source("broken", SourceTier::Project, &["not a valid!! line", "github.com"]),
        source("user", SourceTier::User, &["crates.io"]),
    ]);
    let filter = HostFilter::from_merged(&merged);

    assert!(matches!(
        filter.evaluate("github.com"),
        FilterDecision::Allow { .. }
    ));
    assert!(matches!(
        filter.evaluate("crates.io"),
        FilterDecision::Allow { .. }
    ));
}

#[test]
fn disjoint_segments_do_not_share_admissions() {
    // Segment A whitelists an internal mirror; segment B whitelists only
    // container registries. Each filter is built from its own sources.
    let segment_a = HostFilter::from_merged(&merge(&[source(
        "segment-a",
        SourceTier::Project,
        &["mirror.corp.example"],
    )]));
    let segment_b = HostFilter::from_merged(&merge(&[source(
        "segment-b",
        SourceTier::Project,
        &["registry-1.docker.io"],
    )]));

    assert!(matches!(
        segment_a.evaluate("mirror.corp.example"),
        FilterDecision::Allow { .. }
    ));
    assert_eq!(
        segment_b.evaluate("mirror.corp.example"),
        FilterDecision::Deny
    );

    assert!(matches!(
        segment_b.evaluate("registry-1.docker.io"),
        FilterDecision::Allow { .. }
    ));
    assert_eq!(
        segment_a.evaluate("registry-1.docker.io"),
        FilterDecision::Deny
    );
}

#[tokio::test]
async fn resolution_failure_of_one_domain_does_not_abort_build() {
    use agent_sbx::resolver::{ResolverOptions, build};
    use std::time::{Duration, Instant};

    let merged = merge(&[source(
        "project",
        SourceTier::Project,
        &["localhost", "no-such-host.invalid"],
    )]);

    let opts = ResolverOptions {
        lookup_timeout: Duration::from_secs(2),
        build_deadline: Duration::from_secs(10),
        dns_servers: vec![DNS],
    };

    let started = Instant::now();
    let resolved = build(&merged, &opts).await;

    // The build finished inside the deadline with the resolvable domain.
    assert!(started.elapsed() < opts.build_deadline);
    assert!(resolved.addresses_of("localhost").is_some());
    assert!(resolved.addresses_of("no-such-host.invalid").is_none());

    // The partial set still produces an installable ruleset.
    let ruleset = Ruleset::build(&resolved, &[DNS], "SBX-EGRESS", DenyAction::Reject);
    assert!(matches!(
        ruleset.rules(Family::V4).last(),
        Some(Rule::Deny { .. })
    ));
}

#[test]
fn whitelist_file_sources_feed_the_pipeline() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("whitelist.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# project whitelist").unwrap();
    writeln!(file, "github.com, *.pypi.org").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "crates.io static.crates.io").unwrap();

    let merged = merge(&[DomainSource::from_file(&path, SourceTier::Project)]);
    assert_eq!(merged.len(), 4);

    let filter = HostFilter::from_merged(&merged);
    assert!(matches!(
        filter.evaluate("static.crates.io"),
        FilterDecision::Allow { .. }
    ));

    // A missing file degrades to an empty source, not a failure.
    let empty = merge(&[DomainSource::from_file(
        Path::new("/nonexistent/whitelist.txt"),
        SourceTier::Project,
    )]);
    assert!(empty.is_empty());
}
