//! Merging tiered sources into one de-duplicated list.
//!
//! [`merge`] consumes an ordered list of [`DomainSource`]s and produces a
//! [`MergedList`]: the unique union of every parseable pattern, keyed in
//! sorted order so the output is deterministic regardless of source order or
//! duplication. Malformed tokens are dropped with a warning; a single bad
//! entry never fails the run.

use super::pattern::DomainPattern;
use super::source::{DomainSource, SourceTier};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The de-duplicated union of all configured whitelist sources.
///
/// Each pattern records the highest tier that contributed it, for
/// provenance diagnostics. The list is rebuilt from sources at every startup
/// and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedList {
    entries: BTreeMap<DomainPattern, SourceTier>,
}

impl MergedList {
    /// All patterns in sorted order.
    pub fn patterns(&self) -> impl Iterator<Item = &DomainPattern> {
        self.entries.keys()
    }

    /// Exact (non-wildcard) patterns in sorted order.
    pub fn exact_patterns(&self) -> impl Iterator<Item = &DomainPattern> {
        self.entries.keys().filter(|p| !p.is_wildcard())
    }

    /// Wildcard patterns in sorted order.
    pub fn wildcard_patterns(&self) -> impl Iterator<Item = &DomainPattern> {
        self.entries.keys().filter(|p| p.is_wildcard())
    }

    /// The provenance tier recorded for a pattern, if present.
    pub fn tier_of(&self, pattern: &DomainPattern) -> Option<SourceTier> {
        self.entries.get(pattern).copied()
    }

    /// Whether any pattern (exact or wildcard) matches the hostname.
    pub fn matches(&self, hostname: &str) -> bool {
        self.entries.keys().any(|p| p.matches(hostname))
    }

    /// Number of unique patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge an ordered list of sources into one [`MergedList`].
///
/// Tokens that fail to parse are dropped with a warning naming the source.
/// Duplicate patterns keep the highest contributing tier, so a user entry is
/// never shadowed by a builtin one.
pub fn merge(sources: &[DomainSource]) -> MergedList {
    let mut entries: BTreeMap<DomainPattern, SourceTier> = BTreeMap::new();
    let mut dropped = 0usize;

    for source in sources {
        let mut accepted = 0usize;
        for token in source.tokens() {
            match DomainPattern::parse(token) {
                Ok(pattern) => {
                    accepted += 1;
                    entries
                        .entry(pattern)
                        .and_modify(|tier| *tier = (*tier).max(source.tier))
                        .or_insert(source.tier);
                }
                Err(e) => {
                    dropped += 1;
                    warn!("Dropping malformed entry in {}: {}", source.name, e);
                }
            }
        }
        debug!(
            "Merged {} entries from {} ({})",
            accepted,
            source.name,
            source.tier.label()
        );
    }

    if dropped > 0 {
        warn!("{} malformed whitelist entries dropped", dropped);
    }

    MergedList { entries }
}
