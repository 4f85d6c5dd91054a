//! The staged egress ruleset.
//!
//! A [`Ruleset`] is a plain value: the complete ordered list of rules for the
//! dedicated egress chain, built once from a
//! [`ResolvedAddressSet`](crate::resolver::ResolvedAddressSet) and then handed
//! to the engine for a single atomic commit. Rules are never appended to a
//! live chain one by one.
//!
//! # Rule order
//!
//! 1. Loopback accept (always present)
//! 2. Established/related accept (always present)
//! 3. DNS accepts, UDP and TCP port 53, one pair per configured resolver
//! 4. One accept per resolved address, sorted
//! 5. Terminal deny (always last)
//!
//! The fixed allowances exist regardless of whitelist content: even a ruleset
//! that resolved no domains must still permit DNS and local traffic so that
//! recovery and diagnostics remain possible.

use crate::resolver::ResolvedAddressSet;
use std::fmt;
use std::net::IpAddr;

/// What the terminal rule does with non-matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyAction {
    /// Refuse with an ICMP port-unreachable; failures surface immediately.
    Reject,
    /// Silently discard.
    Drop,
}

impl DenyAction {
    fn target(&self) -> &'static str {
        match self {
            DenyAction::Reject => "REJECT",
            DenyAction::Drop => "DROP",
        }
    }
}

/// Transport protocol for port-scoped rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    /// UDP.
    Udp,
    /// TCP.
    Tcp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::Udp => f.write_str("udp"),
            Proto::Tcp => f.write_str("tcp"),
        }
    }
}

/// One (action, match) pair in the egress chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Accept anything leaving on the loopback interface.
    AllowLoopback,
    /// Accept return traffic for flows an earlier rule permitted.
    AllowEstablished,
    /// Accept port-53 traffic to one DNS resolver.
    AllowDns {
        /// Resolver address.
        server: IpAddr,
        /// UDP or TCP.
        proto: Proto,
    },
    /// Accept traffic to one resolved whitelist address.
    AllowAddress {
        /// Destination address.
        addr: IpAddr,
    },
    /// The terminal default-deny.
    Deny {
        /// Reject or drop.
        action: DenyAction,
    },
}

impl Rule {
    /// Render this rule as iptables arguments (without `-A CHAIN`).
    fn render(&self) -> String {
        match self {
            Rule::AllowLoopback => "-o lo -j ACCEPT".to_string(),
            Rule::AllowEstablished => {
                "-m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT".to_string()
            }
            Rule::AllowDns { server, proto } => {
                format!("-d {} -p {} --dport 53 -j ACCEPT", server, proto)
            }
            Rule::AllowAddress { addr } => format!("-d {} -j ACCEPT", addr),
            Rule::Deny { action } => format!("-j {}", action.target()),
        }
    }
}

/// Address family a rendered payload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// IPv4 (`iptables-restore`).
    V4,
    /// IPv6 (`ip6tables-restore`).
    V6,
}

/// The complete staged egress policy for both address families.
///
/// `PartialEq` makes idempotence checkable as value equality: rebuilding from
/// an unchanged address set yields an equal ruleset and byte-identical
/// restore payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    chain: String,
    v4: Vec<Rule>,
    v6: Vec<Rule>,
}

impl Ruleset {
    /// Build the complete ruleset from a resolved address set.
    ///
    /// `dns_servers` are allowed on port 53 for their address family whether
    /// or not any whitelist domain resolved.
    pub fn build(
        resolved: &ResolvedAddressSet,
        dns_servers: &[IpAddr],
        chain: &str,
        deny_action: DenyAction,
    ) -> Self {
        let v4 = Self::family_rules(resolved, dns_servers, deny_action, |a| a.is_ipv4());
        let v6 = Self::family_rules(resolved, dns_servers, deny_action, |a| a.is_ipv6());

        Self {
            chain: chain.to_string(),
            v4,
            v6,
        }
    }

    fn family_rules(
        resolved: &ResolvedAddressSet,
        dns_servers: &[IpAddr],
        deny_action: DenyAction,
        in_family: impl Fn(&IpAddr) -> bool,
    ) -> Vec<Rule> {
        let mut rules = vec![Rule::AllowLoopback, Rule::AllowEstablished];

        for server in dns_servers.iter().filter(|a| in_family(a)) {
            rules.push(Rule::AllowDns {
                server: *server,
                proto: Proto::Udp,
            });
            rules.push(Rule::AllowDns {
                server: *server,
                proto: Proto::Tcp,
            });
        }

        // BTreeSet iteration keeps the accepts sorted, so identical address
        // sets render identical payloads.
        for addr in resolved.addresses().iter().filter(|a| in_family(a)) {
            rules.push(Rule::AllowAddress { addr: *addr });
        }

        rules.push(Rule::Deny {
            action: deny_action,
        });
        rules
    }

    /// Name of the dedicated chain.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Rules for one family, in commit order.
    pub fn rules(&self, family: Family) -> &[Rule] {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    /// Render the `iptables-restore` payload for one family.
    ///
    /// The payload declares the chain, flushes it, and repopulates it; fed to
    /// `iptables-restore --noflush` this replaces the chain's contents in a
    /// single kernel commit, so no packet ever observes a half-installed
    /// ruleset and no stale rule survives a refresh.
    pub fn restore_payload(&self, family: Family) -> String {
        let mut out = String::new();
        out.push_str("*filter\n");
        out.push_str(&format!(":{} - [0:0]\n", self.chain));
        out.push_str(&format!("-F {}\n", self.chain));
        for rule in self.rules(family) {
            out.push_str(&format!("-A {} {}\n", self.chain, rule.render()));
        }
        out.push_str("COMMIT\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn dns() -> Vec<IpAddr> {
        vec![
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
        ]
    }

    fn resolved_one() -> ResolvedAddressSet {
        let mut set = ResolvedAddressSet::default();
        set.insert("github.com", [IpAddr::V4(Ipv4Addr::new(140, 82, 121, 3))]);
        set
    }

    #[test]
    fn test_terminal_rule_is_always_deny() {
        let ruleset = Ruleset::build(&resolved_one(), &dns(), "SBX-EGRESS", DenyAction::Reject);

        for family in [Family::V4, Family::V6] {
            let last = ruleset.rules(family).last().unwrap();
            assert!(matches!(last, Rule::Deny { .. }));
        }
    }

    #[test]
    fn test_fixed_allowances_present_for_empty_set() {
        // Even with nothing resolved, loopback and DNS stay reachable.
        let empty = ResolvedAddressSet::default();
        let ruleset = Ruleset::build(&empty, &dns(), "SBX-EGRESS", DenyAction::Reject);

        let v4 = ruleset.rules(Family::V4);
        assert!(v4.contains(&Rule::AllowLoopback));
        assert!(v4.contains(&Rule::AllowEstablished));
        assert!(v4.iter().any(|r| matches!(r, Rule::AllowDns { .. })));
        assert!(matches!(v4.last(), Some(Rule::Deny { .. })));
    }

    #[test]
    fn test_addresses_split_by_family() {
        let mut set = ResolvedAddressSet::default();
        let v4_addr = IpAddr::V4(Ipv4Addr::new(140, 82, 121, 3));
        let v6_addr = IpAddr::V6(Ipv6Addr::new(0x2a00, 0, 0, 0, 0, 0, 0, 1));
        set.insert("dual.example.com", [v4_addr, v6_addr]);

        let ruleset = Ruleset::build(&set, &[], "SBX-EGRESS", DenyAction::Reject);

        assert!(
            ruleset
                .rules(Family::V4)
                .contains(&Rule::AllowAddress { addr: v4_addr })
        );
        assert!(
            !ruleset
                .rules(Family::V4)
                .contains(&Rule::AllowAddress { addr: v6_addr })
        );
        assert!(
            ruleset
                .rules(Family::V6)
                .contains(&Rule::AllowAddress { addr: v6_addr })
        );
    }

    #[test]
    fn test_unrelated_address_has_no_rule() {
        let ruleset = Ruleset::build(&resolved_one(), &dns(), "SBX-EGRESS", DenyAction::Reject);
        let unrelated = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 99));

        assert!(
            !ruleset
                .rules(Family::V4)
                .contains(&Rule::AllowAddress { addr: unrelated })
        );
    }

    #[test]
    fn test_payload_rendering() {
        let ruleset = Ruleset::build(
            &resolved_one(),
            &[IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))],
            "SBX-EGRESS",
            DenyAction::Reject,
        );

        let payload = ruleset.restore_payload(Family::V4);
        let expected = "\
*filter
:SBX-EGRESS - [0:0]
-F SBX-EGRESS
-A SBX-EGRESS -o lo -j ACCEPT
-A SBX-EGRESS -m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT
-A SBX-EGRESS -d 1.1.1.1 -p udp --dport 53 -j ACCEPT
-A SBX-EGRESS -d 1.1.1.1 -p tcp --dport 53 -j ACCEPT
-A SBX-EGRESS -d 140.82.121.3 -j ACCEPT
-A SBX-EGRESS -j REJECT
COMMIT
";
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_drop_action_renders_drop() {
        let ruleset = Ruleset::build(
            &ResolvedAddressSet::default(),
            &[],
            "SBX-EGRESS",
            DenyAction::Drop,
        );
        let payload = ruleset.restore_payload(Family::V4);
        assert!(payload.contains("-j DROP"));
        assert!(!payload.contains("-j REJECT"));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let set = resolved_one();
        let servers = dns();

        let first = Ruleset::build(&set, &servers, "SBX-EGRESS", DenyAction::Reject);
        let second = Ruleset::build(&set, &servers, "SBX-EGRESS", DenyAction::Reject);

        assert_eq!(first, second);
        assert_eq!(
            first.restore_payload(Family::V4),
            second.restore_payload(Family::V4)
        );
        assert_eq!(
            first.restore_payload(Family::V6),
            second.restore_payload(Family::V6)
        );
    }
}
