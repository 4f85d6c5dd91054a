//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A requested segment is not defined in the configuration.
    #[error("Unknown segment '{0}'; define [segments.{0}] in the configuration")]
    UnknownSegment(String),

    /// A segment's listen address does not parse.
    #[error("Invalid listen address '{value}' for segment '{segment}'")]
    InvalidListenAddress {
        /// Segment name.
        segment: String,
        /// The offending value.
        value: String,
    },
}
