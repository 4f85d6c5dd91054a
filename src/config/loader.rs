//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. System config: `/etc/agent-sbx/config.toml`
//! 3. User config: `~/.config/agent-sbx/config.toml`
//! 4. Additional config file (via `--config` flag)
//!
//! Missing system/user files are skipped; a missing `--config` file is an
//! error. Invalid TOML anywhere is an error — configuration typos must fail
//! fast, not silently weaken policy.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;

/// Embedded default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/agent-sbx/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "agent-sbx";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// User whitelist filename (user-tier whitelist source).
pub const USER_WHITELIST_FILE: &str = "whitelist.txt";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
    /// Path to the user whitelist file.
    user_whitelist_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader with the default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
            user_whitelist_path: user_config_dir.join(USER_WHITELIST_FILE),
        }
    }

    /// Create a loader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(
        system_path: PathBuf,
        user_path: PathBuf,
        user_whitelist_path: PathBuf,
    ) -> Self {
        Self {
            system_path,
            user_path,
            user_whitelist_path,
        }
    }

    /// Load and merge configuration from all sources.
    pub fn load(&self, extra_config: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config: Config =
            toml::from_str(DEFAULT_CONFIG).map_err(|e| ConfigError::ParseError {
                path: PathBuf::from("<embedded defaults>"),
                source: e,
            })?;
        debug!("Loaded embedded default configuration");

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(path) = extra_config {
            match self.load_file(path)? {
                Some(extra) => {
                    config.merge(extra);
                    debug!("Loaded additional config from {:?}", path);
                }
                None => {
                    // An explicitly requested config file must exist.
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "specified config file not found",
                        ),
                    });
                }
            }
        }

        Ok(config)
    }

    /// Path of the user-tier whitelist file.
    pub fn user_whitelist_path(&self) -> &Path {
        &self.user_whitelist_path
    }

    /// Load one config file; `Ok(None)` if it does not exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let config = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Some(config))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(
            dir.join("system.toml"),
            dir.join("user.toml"),
            dir.join("whitelist.txt"),
        )
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();

        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.firewall.chain_name(), "SBX-EGRESS");
        assert_eq!(config.whitelist.extra_domains_env, "AGENT_SBX_EXTRA_DOMAINS");
        assert!(!config.resolver.dns_servers.is_empty());
    }

    #[test]
    fn test_load_with_no_files_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = loader_in(dir.path()).load(None).unwrap();

        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_load_merges_user_over_system() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[general]\nlog_level = \"warn\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[general]\nlog_level = \"debug\"\n",
        )
        .unwrap();

        let config = loader_in(dir.path()).load(None).unwrap();
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn test_load_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = loader_in(dir.path()).load(Some(Path::new("/nonexistent/extra.toml")));

        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("user.toml")).unwrap();
        writeln!(file, "this is not toml [[[").unwrap();

        let result = loader_in(dir.path()).load(None);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_extra_config_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[firewall]\nchain = \"USER-CHAIN\"\n",
        )
        .unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[firewall]\nchain = \"EXTRA-CHAIN\"\n").unwrap();

        let config = loader_in(dir.path()).load(Some(&extra)).unwrap();
        assert_eq!(config.firewall.chain_name(), "EXTRA-CHAIN");
    }
}
