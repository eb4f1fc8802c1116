//! Error types for the windrig console

use thiserror::Error;

/// Result type alias for console operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the session itself
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A duration setting that humantime cannot parse
    #[error("Invalid duration for {field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: humantime::DurationError,
    },

    /// Malformed console input
    #[error("{0}")]
    Usage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}
