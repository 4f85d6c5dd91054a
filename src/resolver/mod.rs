//! Domain resolution and IP-set building.
//!
//! Turns a [`MergedList`](crate::allowlist::MergedList) into a
//! [`ResolvedAddressSet`]: the mapping from each exact domain pattern to its
//! currently resolved IPv4/IPv6 addresses. The set is what the firewall rule
//! engine can actually enforce — packet filters match addresses, not names.
//!
//! # Two-layer split
//!
//! Wildcard patterns (`*.pypi.org`) cannot be resolved to a finite address
//! set, so they are skipped here with a diagnostic and enforced solely by the
//! proxy filter layer, which matches by hostname. This is an intentional
//! design split, not a gap.
//!
//! # Failure policy
//!
//! - Each lookup is individually time-bounded.
//! - The whole build has a deadline; lookups still in flight when it expires
//!   are abandoned and the build proceeds with whatever resolved.
//! - A domain that fails to resolve contributes nothing but never aborts the
//!   build. If nothing resolves at all, the result is the minimum safe set
//!   (empty — the firewall still installs loopback and DNS allowances).

mod error;

pub use error::ResolveError;

use crate::allowlist::MergedList;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Tuning for the IP-set build.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Timeout applied to each individual domain lookup.
    pub lookup_timeout: Duration,
    /// Ceiling on the whole build; in-flight lookups are abandoned after it.
    pub build_deadline: Duration,
    /// DNS resolver addresses the firewall must keep reachable.
    ///
    /// Resolution itself goes through the system resolver; this list exists
    /// so the packet filter can allow port 53 to the servers the sandbox
    /// actually uses.
    pub dns_servers: Vec<IpAddr>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            build_deadline: Duration::from_secs(15),
            dns_servers: vec![
                IpAddr::from([1, 1, 1, 1]),
                IpAddr::from([8, 8, 8, 8]),
            ],
        }
    }
}

/// Mapping from exact domain patterns to their currently resolved addresses.
///
/// Rebuilt wholesale on every pass: an address is present only while at least
/// one contributing domain resolved to it in the most recent build, so stale
/// addresses are dropped rather than accumulated. The mapping is many-to-many;
/// [`domains_for`](Self::domains_for) answers the reverse direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAddressSet {
    by_domain: BTreeMap<String, BTreeSet<IpAddr>>,
}

impl ResolvedAddressSet {
    /// Record resolved addresses for a domain. Empty address sets are ignored.
    pub fn insert(&mut self, domain: &str, addrs: impl IntoIterator<Item = IpAddr>) {
        let addrs: BTreeSet<IpAddr> = addrs.into_iter().collect();
        if !addrs.is_empty() {
            self.by_domain.insert(domain.to_string(), addrs);
        }
    }

    /// Domains with at least one resolved address, in sorted order.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.by_domain.keys().map(String::as_str)
    }

    /// Addresses for one domain, if it resolved.
    pub fn addresses_of(&self, domain: &str) -> Option<&BTreeSet<IpAddr>> {
        self.by_domain.get(domain)
    }

    /// The union of all resolved addresses, deterministically ordered.
    pub fn addresses(&self) -> BTreeSet<IpAddr> {
        self.by_domain.values().flatten().copied().collect()
    }

    /// All domains that resolved to the given address.
    pub fn domains_for(&self, addr: IpAddr) -> Vec<&str> {
        self.by_domain
            .iter()
            .filter(|(_, addrs)| addrs.contains(&addr))
            .map(|(domain, _)| domain.as_str())
            .collect()
    }

    /// Whether any domain resolved to this address.
    pub fn contains_address(&self, addr: IpAddr) -> bool {
        self.by_domain.values().any(|addrs| addrs.contains(&addr))
    }

    /// Number of domains with at least one address.
    pub fn len(&self) -> usize {
        self.by_domain.len()
    }

    /// Whether nothing resolved.
    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }
}

/// Resolve every exact pattern in the merged list into an address set.
///
/// Lookups run concurrently; each is bounded by
/// [`lookup_timeout`](ResolverOptions::lookup_timeout) and the whole build by
/// [`build_deadline`](ResolverOptions::build_deadline). Failures are warned
/// and skipped. Re-running with an unchanged list and stable DNS yields an
/// address-equivalent set.
pub async fn build(merged: &MergedList, opts: &ResolverOptions) -> ResolvedAddressSet {
    for pattern in merged.wildcard_patterns() {
        info!(
            "Wildcard pattern {} is enforced by the proxy filter only; \
             the packet filter cannot match hostnames",
            pattern
        );
    }

    let mut lookups = JoinSet::new();
    let mut expected = 0usize;
    for pattern in merged.exact_patterns() {
        let domain = pattern.host().to_string();
        let timeout = opts.lookup_timeout;
        expected += 1;
        lookups.spawn(async move {
            let result = match tokio::time::timeout(timeout, lookup(&domain)).await {
                Ok(result) => result,
                Err(_) => Err(ResolveError::Timeout),
            };
            (domain, result)
        });
    }

    let mut set = ResolvedAddressSet::default();
    let deadline = tokio::time::sleep(opts.build_deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = lookups.join_next() => {
                match joined {
                    None => break,
                    Some(Ok((domain, Ok(addrs)))) => {
                        if addrs.is_empty() {
                            warn!("Domain {} resolved to no addresses", domain);
                        } else {
                            debug!("Resolved {} -> {:?}", domain, addrs);
                            set.insert(&domain, addrs);
                        }
                    }
                    Some(Ok((domain, Err(e)))) => {
                        warn!("Failed to resolve {}: {}", domain, e);
                    }
                    Some(Err(e)) => {
                        warn!("Resolver task failed: {}", e);
                    }
                }
            }
            _ = &mut deadline => {
                warn!(
                    "Resolution deadline reached with {} lookups outstanding; \
                     proceeding with {} resolved domains",
                    lookups.len(),
                    set.len()
                );
                lookups.abort_all();
                break;
            }
        }
    }

    if expected > 0 && set.is_empty() {
        warn!(
            "No domains resolved; falling back to the minimum safe set \
             (loopback and DNS only)"
        );
    }

    set
}

/// Resolve one domain to its A/AAAA addresses via the system resolver.
async fn lookup(domain: &str) -> Result<BTreeSet<IpAddr>, ResolveError> {
    let addrs = tokio::net::lookup_host((domain, 0u16)).await?;
    Ok(addrs.map(|sa| sa.ip()).collect())
}
