//! Error types for Vent
//!
//! Uses `thiserror` for library errors. Pipeline-fatal conditions map to
//! `VentError::Dispatch`; per-unit failures inside a concurrent phase are
//! collected as `server::UnitError` values and never cross a join barrier
//! as panics.

use thiserror::Error;

/// Result type alias for Vent operations
pub type VentResult<T> = Result<T, VentError>;

/// Main error type for Vent operations
#[derive(Error, Debug)]
pub enum VentError {
    /// Configuration or topology inconsistency (fatal before any side effect)
    #[error("parsing error: {0}")]
    Parsing(String),

    /// No eligible server for a (appGroup, hostGroup) pair
    #[error("no server available for application group '{app_group}' and host group '{host_group}'")]
    NoServerAvailable {
        app_group: String,
        host_group: String,
    },

    /// Pipeline-fatal dispatch failure (SCM, generation, commit, switch)
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Version-control backend failure
    #[error("revision control error: {0}")]
    Scm(String),

    /// A command run on a target exited non-zero
    #[error("command failed on '{server}' (exit {code}): {output}")]
    Remote {
        server: String,
        code: i32,
        output: String,
    },

    /// Invalid or inconsistent configuration file
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON (state file) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
