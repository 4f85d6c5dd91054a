//! Domain pattern parsing and matching.
//!
//! A [`DomainPattern`] identifies either an exact host (`github.com`) or a
//! wildcard subdomain family (`*.pypi.org`). Patterns are normalized at parse
//! time: lower-cased, with any URL scheme, path, and port stripped, so that
//! `HTTPS://GitHub.com/owner/repo` and `github.com` merge to the same entry.
//!
//! # Matching
//!
//! - Exact: `github.com` matches only `github.com`.
//! - Wildcard: `*.example.com` matches `sub.example.com` and
//!   `deep.sub.example.com` but NOT `example.com` itself and NOT
//!   `fakeexample.com`.

use super::error::PatternError;
use std::fmt;

/// A normalized domain pattern: an exact host or a `*.`-prefixed wildcard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainPattern {
    /// Normalized pattern text, including the `*.` marker for wildcards.
    text: String,
    /// Whether this pattern is a wildcard subdomain family.
    wildcard: bool,
}

impl DomainPattern {
    /// Parse and normalize a raw token into a pattern.
    ///
    /// Normalization steps, in order:
    /// 1. Trim surrounding whitespace.
    /// 2. Strip a `scheme://` prefix if present.
    /// 3. Strip everything from the first `/` (path) onward.
    /// 4. Strip a trailing `:port` suffix.
    /// 5. Lower-case.
    ///
    /// A leading `*.` marks a wildcard; any other `*` is rejected.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut s = raw.trim();

        if let Some(idx) = s.find("://") {
            s = &s[idx + 3..];
        }
        if let Some(idx) = s.find('/') {
            s = &s[..idx];
        }
        // A trailing :port is noise from copy-pasted URLs, not part of the host.
        if let Some(idx) = s.rfind(':')
            && s[idx + 1..].chars().all(|c| c.is_ascii_digit())
            && !s[idx + 1..].is_empty()
        {
            s = &s[..idx];
        }

        if s.is_empty() {
            return Err(PatternError::Empty);
        }

        let lower = s.to_lowercase();
        let (host, wildcard) = match lower.strip_prefix("*.") {
            Some(rest) => (rest, true),
            None => (lower.as_str(), false),
        };

        if host.is_empty() {
            return Err(PatternError::Empty);
        }
        if host.contains('*') {
            return Err(PatternError::MisplacedWildcard(raw.trim().to_string()));
        }
        if !host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
        {
            return Err(PatternError::InvalidCharacter(raw.trim().to_string()));
        }
        if host.starts_with('.') || host.ends_with('.') || host.contains("..") {
            return Err(PatternError::MalformedHost(raw.trim().to_string()));
        }

        Ok(Self {
            text: lower,
            wildcard,
        })
    }

    /// Whether this pattern is a wildcard subdomain family.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// The normalized pattern text, including the `*.` marker for wildcards.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The host part without any wildcard marker.
    ///
    /// For `*.example.com` this is `example.com`; for exact patterns it is
    /// the pattern itself.
    pub fn host(&self) -> &str {
        match self.wildcard {
            true => &self.text[2..],
            false => &self.text,
        }
    }

    /// Check whether a hostname matches this pattern.
    ///
    /// The hostname is lower-cased before comparison. Wildcards require at
    /// least one label before the suffix, so `*.example.com` never matches
    /// the bare `example.com`.
    pub fn matches(&self, hostname: &str) -> bool {
        let host = hostname.to_lowercase();
        if !self.wildcard {
            return host == self.text;
        }

        let suffix = self.host();
        if let Some(prefix) = host.strip_suffix(suffix) {
            // The character before the suffix must be a dot, and something
            // must precede it.
            prefix.len() > 1 && prefix.ends_with('.')
        } else {
            false
        }
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
