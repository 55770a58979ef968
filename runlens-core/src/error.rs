//! Error types for runlens-core

use thiserror::Error;

/// Main error type for the runlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value. Fatal at load time.
    #[error("configuration error: {field}={value:?}: {reason}")]
    Config {
        field: String,
        value: String,
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config file parse error
    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A collector failed to transform its records
    #[error("collector error: {0}")]
    Collector(String),

    /// Remote cache error
    #[error("store error: {0}")]
    Store(String),

    /// Aggregation input could not be combined
    #[error("aggregation error: {0}")]
    Aggregation(String),

    /// Persisted record carries a schema version this build does not understand
    #[error("unsupported schema version: expected {expected}, found {found}")]
    SchemaVersion { expected: String, found: String },
}

impl Error {
    /// Build a configuration error for `field` holding the raw `value`.
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for runlens-core
pub type Result<T> = std::result::Result<T, Error>;
