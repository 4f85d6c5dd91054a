//! Whitelist aggregation.
//!
//! This module turns an ordered list of domain-pattern sources — builtin
//! defaults, project file, user file, environment variable, CLI flags — into
//! one de-duplicated, normalized [`MergedList`]. The merged list is the single
//! source of truth consumed independently by the firewall build (via the
//! resolver) and by each proxy filter instance.
//!
//! Sources are constructed at the program edge and passed in explicitly; the
//! aggregator itself never reads files or the environment, which keeps merge
//! order and precedence testable in isolation.

mod error;
mod merge;
mod pattern;
mod source;

pub use error::PatternError;
pub use merge::{MergedList, merge};
pub use pattern::DomainPattern;
pub use source::{DomainSource, SourceTier};
