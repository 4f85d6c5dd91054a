//! Whitelist sources and their precedence tiers.
//!
//! A [`DomainSource`] is a named sequence of raw whitelist lines plus the
//! tier it contributes at. Sources are constructed at the edge of the program
//! (CLI handler) and passed into the aggregator as an explicit ordered list —
//! the merge logic never touches the filesystem or the environment itself, so
//! precedence stays testable in isolation.
//!
//! # Source format
//!
//! Plain text; blank lines and `#`-prefixed comment lines are ignored; each
//! remaining line carries one or more space- or comma-separated domain
//! patterns.

use std::fs;
use std::path::Path;
use tracing::warn;

/// Embedded builtin whitelist, compiled into the binary.
const BUILTIN_DOMAINS: &str = include_str!("../../config/builtin-domains.txt");

/// Precedence tier of a whitelist source.
///
/// Ordering matters: when the same pattern arrives from several tiers, the
/// highest tier is recorded as its provenance. User entries are never removed
/// by lower tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceTier {
    /// Defaults shipped with the binary.
    Builtin,
    /// Project-scoped whitelist file.
    Project,
    /// User-scoped file, environment variable, or CLI flag.
    User,
}

impl SourceTier {
    /// Short lowercase label for logs and audit events.
    pub fn label(&self) -> &'static str {
        match self {
            SourceTier::Builtin => "builtin",
            SourceTier::Project => "project",
            SourceTier::User => "user",
        }
    }
}

/// One named whitelist source: raw lines plus the tier they merge at.
#[derive(Debug, Clone)]
pub struct DomainSource {
    /// Human-readable origin for diagnostics ("builtin", a path, an env var).
    pub name: String,
    /// Precedence tier.
    pub tier: SourceTier,
    /// Raw lines, not yet tokenized.
    pub lines: Vec<String>,
}

impl DomainSource {
    /// The builtin source embedded in the binary.
    pub fn builtin() -> Self {
        Self {
            name: "builtin".to_string(),
            tier: SourceTier::Builtin,
            lines: BUILTIN_DOMAINS.lines().map(str::to_string).collect(),
        }
    }

    /// Read a whitelist file as a source at the given tier.
    ///
    /// An unreadable or missing file is not fatal: the source is returned
    /// empty and a warning is logged. Partial degradation beats a total
    /// lockout.
    pub fn from_file(path: &Path, tier: SourceTier) -> Self {
        let name = path.display().to_string();
        let lines = match fs::read_to_string(path) {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(e) => {
                warn!("Skipping unreadable whitelist source {}: {}", name, e);
                Vec::new()
            }
        };
        Self {
            name,
            tier,
            lines,
        }
    }

    /// Build a source from an environment variable's value.
    ///
    /// The variable holds a single comma/space-separated list and merges at
    /// the user tier. The caller reads the environment; this constructor only
    /// records what it was given.
    pub fn from_env(var: &str, value: Option<String>) -> Self {
        let lines = match value {
            Some(v) if !v.trim().is_empty() => vec![v],
            _ => Vec::new(),
        };
        Self {
            name: format!("env:{}", var),
            tier: SourceTier::User,
            lines,
        }
    }

    /// Build a source from already-collected entries (CLI flags).
    pub fn from_entries(name: &str, tier: SourceTier, entries: &[String]) -> Self {
        Self {
            name: name.to_string(),
            tier,
            lines: entries.to_vec(),
        }
    }

    /// Tokenize this source's lines into raw pattern candidates.
    ///
    /// Blank lines and comments are discarded; each remaining line is split
    /// on spaces and commas.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .flat_map(|line| line.split([' ', '\t', ',']))
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tier_ordering() {
        assert!(SourceTier::Builtin < SourceTier::Project);
        assert!(SourceTier::Project < SourceTier::User);
    }

    #[test]
    fn test_builtin_is_nonempty() {
        let source = DomainSource::builtin();
        assert_eq!(source.tier, SourceTier::Builtin);
        let tokens: Vec<&str> = source.tokens().collect();
        assert!(tokens.contains(&"pypi.org"));
        assert!(tokens.contains(&"github.com"));
    }

    #[test]
    fn test_tokens_skip_comments_and_blanks() {
        let source = DomainSource {
            name: "test".to_string(),
            tier: SourceTier::Project,
            lines: vec![
                "# a comment".to_string(),
                String::new(),
                "  github.com  ".to_string(),
                "pypi.org, crates.io registry.npmjs.org".to_string(),
            ],
        };

        let tokens: Vec<&str> = source.tokens().collect();
        assert_eq!(
            tokens,
            vec!["github.com", "pypi.org", "crates.io", "registry.npmjs.org"]
        );
    }

    #[test]
    fn test_from_file_missing_is_empty() {
        let source = DomainSource::from_file(
            Path::new("/nonexistent/whitelist.txt"),
            SourceTier::Project,
        );
        assert_eq!(source.tokens().count(), 0);
    }

    #[test]
    fn test_from_file_reads_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# project whitelist").unwrap();
        writeln!(file, "internal.example.com").unwrap();

        let source = DomainSource::from_file(file.path(), SourceTier::Project);
        let tokens: Vec<&str> = source.tokens().collect();
        assert_eq!(tokens, vec!["internal.example.com"]);
    }

    #[test]
    fn test_from_env_absent_is_empty() {
        let source = DomainSource::from_env("AGENT_SBX_EXTRA_DOMAINS", None);
        assert_eq!(source.tier, SourceTier::User);
        assert_eq!(source.tokens().count(), 0);
    }

    #[test]
    fn test_from_env_splits_list() {
        let source = DomainSource::from_env(
            "AGENT_SBX_EXTRA_DOMAINS",
            Some("api.corp.example, mirror.corp.example".to_string()),
        );
        let tokens: Vec<&str> = source.tokens().collect();
        assert_eq!(tokens, vec!["api.corp.example", "mirror.corp.example"]);
    }
}
