// error.rs — Error types for configuration and the arbiter facade.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or rendering an [`crate::ArbiterConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    Env { var: String, reason: String },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Errors surfaced by [`crate::Arbiter`].
///
/// Only setup problems and malformed top-level input reach the caller;
/// per-policy and per-conflict failures are contained inside the pipeline.
#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("policy error: {0}")]
    Policy(#[from] arb_policy::PolicyError),

    #[error("conflict error: {0}")]
    Conflict(#[from] arb_conflict::ConflictError),
}
