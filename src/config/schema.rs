//! Configuration schema definitions.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. System config: `/etc/agent-sbx/config.toml`
//! 3. User config: `~/.config/agent-sbx/config.toml`
//! 4. Additional config file (via `--config` flag)
//!
//! Lists are **merged** (appended); scalars are **overridden**. The one
//! exception is the DNS resolver list, which is a replacement set: a
//! deployment that points at corporate resolvers replaces the defaults
//! rather than accumulating public ones alongside them.

use crate::firewall::DenyAction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Whitelist source settings.
    #[serde(default)]
    pub whitelist: WhitelistConfig,

    /// Resolver tuning.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Firewall settings.
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Network segments, each with exactly one proxy endpoint.
    ///
    /// Keys are segment names (e.g. "workspace", "dind").
    #[serde(default)]
    pub segments: HashMap<String, SegmentConfig>,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists are merged (appended), scalars overridden, segments merged by
    /// key with segment-specific merge rules.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.whitelist.merge(other.whitelist);
        self.resolver.merge(other.resolver);
        self.firewall.merge(other.firewall);

        for (name, other_segment) in other.segments {
            if let Some(existing) = self.segments.get_mut(&name) {
                existing.merge(other_segment);
            } else {
                self.segments.insert(name, other_segment);
            }
        }
    }

    /// Names of the configured segments, sorted.
    pub fn segment_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.segments.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Where whitelist entries come from, beyond the embedded builtin list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhitelistConfig {
    /// Project-level whitelist file (relative paths resolve against the
    /// working directory).
    #[serde(default)]
    pub project_file: Option<PathBuf>,

    /// Environment variable carrying extra comma/space-separated domains,
    /// merged at the user tier.
    #[serde(default)]
    pub extra_domains_env: String,

    /// Extra domain patterns inlined in the config, merged at the user tier.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl WhitelistConfig {
    fn merge(&mut self, other: WhitelistConfig) {
        if other.project_file.is_some() {
            self.project_file = other.project_file;
        }
        if !other.extra_domains_env.is_empty() {
            self.extra_domains_env = other.extra_domains_env;
        }
        self.domains.extend(other.domains);
    }
}

/// Resolver tuning.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// DNS resolvers the firewall keeps reachable on port 53.
    ///
    /// A replacement set, not an accumulation: the highest layer that sets
    /// it wins wholesale.
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,

    /// Per-lookup timeout in milliseconds.
    #[serde(default)]
    pub lookup_timeout_ms: u64,

    /// Overall build deadline in milliseconds.
    #[serde(default)]
    pub build_deadline_ms: u64,
}

impl ResolverConfig {
    fn merge(&mut self, other: ResolverConfig) {
        if !other.dns_servers.is_empty() {
            self.dns_servers = other.dns_servers;
        }
        if other.lookup_timeout_ms != 0 {
            self.lookup_timeout_ms = other.lookup_timeout_ms;
        }
        if other.build_deadline_ms != 0 {
            self.build_deadline_ms = other.build_deadline_ms;
        }
    }

    /// Resolver options with configured values, falling back to defaults for
    /// anything unset.
    pub fn options(&self) -> crate::resolver::ResolverOptions {
        let mut opts = crate::resolver::ResolverOptions::default();
        if !self.dns_servers.is_empty() {
            opts.dns_servers = self.dns_servers.clone();
        }
        if self.lookup_timeout_ms != 0 {
            opts.lookup_timeout = std::time::Duration::from_millis(self.lookup_timeout_ms);
        }
        if self.build_deadline_ms != 0 {
            opts.build_deadline = std::time::Duration::from_millis(self.build_deadline_ms);
        }
        opts
    }
}

/// What the terminal rule does; config-file spelling of
/// [`DenyAction`](crate::firewall::DenyAction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyActionConfig {
    /// Refuse with ICMP port-unreachable.
    Reject,
    /// Silently discard.
    Drop,
}

/// Firewall settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FirewallConfig {
    /// Name of the dedicated egress chain.
    #[serde(default)]
    pub chain: String,

    /// Terminal rule behavior.
    #[serde(default)]
    pub deny_action: Option<DenyActionConfig>,
}

impl FirewallConfig {
    fn merge(&mut self, other: FirewallConfig) {
        if !other.chain.is_empty() {
            self.chain = other.chain;
        }
        if other.deny_action.is_some() {
            self.deny_action = other.deny_action;
        }
    }

    /// Chain name, falling back to the shipped default.
    pub fn chain_name(&self) -> &str {
        if self.chain.is_empty() {
            "SBX-EGRESS"
        } else {
            &self.chain
        }
    }

    /// Terminal action, defaulting to reject.
    pub fn deny_action(&self) -> DenyAction {
        match self.deny_action {
            Some(DenyActionConfig::Drop) => DenyAction::Drop,
            _ => DenyAction::Reject,
        }
    }
}

/// One network segment: exactly one proxy endpoint plus the whitelist
/// sources scoped to it.
///
/// A segment's filter configuration is derived only from sources named here;
/// nothing is ever copied from another segment at runtime.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SegmentConfig {
    /// Listen address for this segment's proxy (e.g. `127.0.0.1:8888`).
    #[serde(default)]
    pub listen: String,

    /// Segment-scoped whitelist file, merged at the project tier.
    #[serde(default)]
    pub filter_file: Option<PathBuf>,

    /// Environment variable carrying this segment's extra domains.
    #[serde(default)]
    pub extra_domains_env: Option<String>,

    /// Chained upstream proxy URL (`http://host:port`).
    #[serde(default)]
    pub upstream: Option<String>,

    /// Domain patterns that bypass the upstream and connect directly.
    #[serde(default)]
    pub no_upstream: Vec<String>,

    /// Services bound to this segment; each must name this segment as its
    /// proxy.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl SegmentConfig {
    /// Merge another segment config into this one.
    pub fn merge(&mut self, other: SegmentConfig) {
        if !other.listen.is_empty() {
            self.listen = other.listen;
        }
        if other.filter_file.is_some() {
            self.filter_file = other.filter_file;
        }
        if other.extra_domains_env.is_some() {
            self.extra_domains_env = other.extra_domains_env;
        }
        if other.upstream.is_some() {
            self.upstream = other.upstream;
        }
        self.no_upstream.extend(other.no_upstream);
        self.services.extend(other.services);
    }
}

/// A service running inside a segment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name (container/service identifier).
    pub name: String,
    /// The segment whose proxy this service routes through.
    pub proxy: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_empty() {
        let config = Config::default();

        assert!(config.general.log_level.is_empty());
        assert!(config.whitelist.domains.is_empty());
        assert!(config.resolver.dns_servers.is_empty());
        assert!(config.segments.is_empty());
    }

    #[test]
    fn test_config_merge_scalars() {
        let mut base = Config::default();
        base.merge(Config {
            general: GeneralConfig {
                log_level: "debug".to_string(),
            },
            ..Default::default()
        });

        assert_eq!(base.general.log_level, "debug");
    }

    #[test]
    fn test_config_merge_whitelist_domains_appended() {
        let mut base = Config {
            whitelist: WhitelistConfig {
                domains: vec!["pypi.org".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        base.merge(Config {
            whitelist: WhitelistConfig {
                domains: vec!["custom.example.com".to_string()],
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(base.whitelist.domains.len(), 2);
        assert!(base.whitelist.domains.contains(&"pypi.org".to_string()));
    }

    #[test]
    fn test_dns_servers_replace_rather_than_append() {
        let mut base = Config {
            resolver: ResolverConfig {
                dns_servers: vec!["1.1.1.1".parse().unwrap(), "8.8.8.8".parse().unwrap()],
                ..Default::default()
            },
            ..Default::default()
        };

        base.merge(Config {
            resolver: ResolverConfig {
                dns_servers: vec!["10.0.0.53".parse().unwrap()],
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(base.resolver.dns_servers.len(), 1);
        assert_eq!(base.resolver.dns_servers[0], "10.0.0.53".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_segment_merge_by_key() {
        let mut base = Config {
            segments: HashMap::from([(
                "workspace".to_string(),
                SegmentConfig {
                    listen: "127.0.0.1:8888".to_string(),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        base.merge(Config {
            segments: HashMap::from([
                (
                    "workspace".to_string(),
                    SegmentConfig {
                        extra_domains_env: Some("WORKSPACE_DOMAINS".to_string()),
                        ..Default::default()
                    },
                ),
                (
                    "dind".to_string(),
                    SegmentConfig {
                        listen: "127.0.0.1:3128".to_string(),
                        ..Default::default()
                    },
                ),
            ]),
            ..Default::default()
        });

        let workspace = base.segments.get("workspace").unwrap();
        assert_eq!(workspace.listen, "127.0.0.1:8888");
        assert_eq!(
            workspace.extra_domains_env,
            Some("WORKSPACE_DOMAINS".to_string())
        );
        assert!(base.segments.contains_key("dind"));
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            [general]
            log_level = "trace"

            [whitelist]
            project_file = "whitelist.txt"
            domains = ["internal.corp.example"]

            [resolver]
            dns_servers = ["10.0.0.53"]
            lookup_timeout_ms = 1500

            [firewall]
            chain = "SBX-EGRESS"
            deny_action = "drop"

            [segments.workspace]
            listen = "127.0.0.1:8888"
            extra_domains_env = "WORKSPACE_DOMAINS"

            [[segments.workspace.services]]
            name = "devcontainer"
            proxy = "workspace"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.general.log_level, "trace");
        assert_eq!(
            config.whitelist.project_file,
            Some(PathBuf::from("whitelist.txt"))
        );
        assert_eq!(config.firewall.deny_action(), DenyAction::Drop);

        let workspace = config.segments.get("workspace").unwrap();
        assert_eq!(workspace.listen, "127.0.0.1:8888");
        assert_eq!(workspace.services.len(), 1);
        assert_eq!(workspace.services[0].proxy, "workspace");
    }

    #[test]
    fn test_firewall_defaults() {
        let config = FirewallConfig::default();
        assert_eq!(config.chain_name(), "SBX-EGRESS");
        assert_eq!(config.deny_action(), DenyAction::Reject);
    }

    #[test]
    fn test_resolver_options_fall_back_to_defaults() {
        let section = ResolverConfig::default();
        let opts = section.options();

        assert!(!opts.dns_servers.is_empty());
        assert_eq!(opts.lookup_timeout, std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_resolver_options_apply_overrides() {
        let section = ResolverConfig {
            dns_servers: vec!["10.0.0.53".parse().unwrap()],
            lookup_timeout_ms: 500,
            build_deadline_ms: 5000,
        };
        let opts = section.options();

        assert_eq!(opts.dns_servers.len(), 1);
        assert_eq!(opts.lookup_timeout, std::time::Duration::from_millis(500));
        assert_eq!(opts.build_deadline, std::time::Duration::from_millis(5000));
    }

    #[test]
    fn test_segment_names_sorted() {
        let config = Config {
            segments: HashMap::from([
                ("workspace".to_string(), SegmentConfig::default()),
                ("dind".to_string(), SegmentConfig::default()),
            ]),
            ..Default::default()
        };

        assert_eq!(config.segment_names(), vec!["dind", "workspace"]);
    }
}
