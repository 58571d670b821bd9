// error.rs — Error types for conflict detection and resolution.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the registry, the detector and event sinks.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Malformed top-level input (missing agent id, empty action kind, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A conflict with this id is already registered.
    #[error("conflict {conflict_id} is already registered")]
    DuplicateConflict { conflict_id: Uuid },

    /// No conflict with this id is registered.
    #[error("conflict not found: {0}")]
    NotFound(Uuid),

    /// A file I/O operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize an event.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Why a conflict could not be resolved. Always local to one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No strategy is registered for the violated policy.
    #[error("no resolution strategy registered for policy '{policy_id}'")]
    StrategyMissing { policy_id: String },

    /// The strategy could not produce a plan.
    #[error("strategy '{strategy}' could not plan a resolution: {reason}")]
    PlanFailed { strategy: String, reason: String },

    /// The strategy produced a plan with no remediation actions.
    #[error("strategy '{strategy}' produced an empty plan")]
    EmptyPlan { strategy: String },

    /// Applying the resolution raised an error or overran its budget.
    #[error("resolution {resolution_id} failed to apply: {reason}")]
    ApplyFailed { resolution_id: Uuid, reason: String },
}
