//! Error types surfaced before any command runs.
//!
//! Failures that happen during execution (non-zero exits, timeouts, spawn
//! failures, unreadable logs) are never errors here: they are recorded as
//! attempts and findings in the report.

use std::path::PathBuf;

/// Malformed input to the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("command text is empty")]
    EmptyCommand,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// Invalid configuration, detected before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid danger pattern '{name}': {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors the orchestrator reports to its caller instead of executing.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("command blocked: matches dangerous pattern '{pattern}' ({reason}). Use --allow-destructive to override.")]
    Blocked { pattern: String, reason: String },

    #[error("command cancelled: confirmation not granted for '{command}'")]
    Cancelled { command: String },

    #[error("invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error(transparent)]
    InvalidRequest(#[from] RequestError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
