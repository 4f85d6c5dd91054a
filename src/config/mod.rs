//! Hierarchical TOML configuration.
//!
//! Schema, loader, and the static segment-isolation validation. The merge
//! hierarchy is embedded defaults → system → user → `--config` file; lists
//! append, scalars override.

mod error;
mod loader;
pub mod schema;
pub mod segments;

pub use error::ConfigError;
pub use loader::{
    ConfigLoader, DEFAULT_CONFIG, SYSTEM_CONFIG_PATH, USER_CONFIG_DIR, USER_CONFIG_FILE,
    USER_WHITELIST_FILE,
};
pub use schema::{
    Config, DenyActionConfig, FirewallConfig, GeneralConfig, ResolverConfig, SegmentConfig,
    ServiceConfig, WhitelistConfig,
};
pub use segments::{SegmentViolation, validate};
