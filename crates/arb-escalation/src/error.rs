// error.rs — Error types for escalation dispatch.

use std::path::PathBuf;

use thiserror::Error;

use arb_policy::BoundedError;

/// Errors raised while delivering an escalation.
///
/// None of these reach the pipeline: the manager logs them and moves on.
#[derive(Debug, Error)]
pub enum EscalationError {
    /// The configured channel name has no registered channel.
    #[error("unknown escalation channel '{channel}'")]
    UnknownChannel { channel: String },

    /// The channel accepted the payload but could not deliver it.
    #[error("escalation channel '{channel}' failed: {reason}")]
    ChannelFailed { channel: String, reason: String },

    /// The channel timed out or panicked.
    #[error("escalation via '{channel}' did not complete: {source}")]
    Dispatch {
        channel: String,
        #[source]
        source: BoundedError,
    },

    /// A file I/O operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a payload.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
