//! Error types for whitelist aggregation.

use thiserror::Error;

/// Reasons a raw token cannot become a [`DomainPattern`](super::DomainPattern).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Nothing left after trimming and stripping scheme/path/port.
    #[error("empty domain pattern")]
    Empty,

    /// A `*` appears anywhere other than a leading `*.` marker.
    #[error("misplaced wildcard in '{0}'")]
    MisplacedWildcard(String),

    /// The host part contains characters outside `[a-z0-9.-]`.
    #[error("invalid character in domain pattern '{0}'")]
    InvalidCharacter(String),

    /// The host part has a malformed label structure (leading/trailing or
    /// doubled dots).
    #[error("malformed host in domain pattern '{0}'")]
    MalformedHost(String),
}
