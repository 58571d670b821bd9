// error.rs — Error types for the policy subsystem.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during policy registration and evaluation.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A policy with the same id is already registered.
    #[error("policy '{policy_id}' is already registered")]
    DuplicatePolicy { policy_id: String },

    /// Malformed policy or action input, rejected before evaluation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A policy could not reach a verdict for the given action.
    #[error("policy '{policy_id}' could not evaluate the action: {reason}")]
    Evaluation { policy_id: String, reason: String },

    /// A glob pattern is malformed and cannot be parsed.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Why a bounded call produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundedError {
    /// The work did not finish within its budget and was abandoned.
    #[error("timed out after {} ms", .0.as_millis())]
    TimedOut(Duration),

    /// The work panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// No worker thread could be started for the work.
    #[error("worker could not be started: {0}")]
    Spawn(String),
}
