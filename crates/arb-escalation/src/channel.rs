// channel.rs — Escalation channels: where unresolved conflicts are sent.
//
// The manager picks one channel by name from its configuration. Built-in
// channels cover the local cases (structured log, JSONL file); embedders
// register their own for email, chat, paging, ...

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::EscalationError;
use crate::payload::EscalationPayload;

/// A delivery mechanism for escalations.
///
/// `send` runs on a worker thread under the manager's dispatch timeout, so it
/// may block on network or disk but should not wait for a human.
pub trait EscalationChannel: Send + Sync {
    fn send(&self, recipients: &[String], payload: &EscalationPayload)
        -> Result<(), EscalationError>;
}

/// Writes escalations to the tracing log. Always registered as "log".
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

impl EscalationChannel for LogChannel {
    fn send(
        &self,
        recipients: &[String],
        payload: &EscalationPayload,
    ) -> Result<(), EscalationError> {
        tracing::warn!(
            conflict_id = %payload.conflict_id,
            recipients = %recipients.join(","),
            "escalation:\n{}",
            payload.render_text()
        );
        Ok(())
    }
}

/// One line of a [`JsonlChannel`] file.
#[derive(Serialize)]
struct EscalationLine<'a> {
    recipients: &'a [String],
    #[serde(flatten)]
    payload: &'a EscalationPayload,
}

/// Appends escalations as JSON lines, for an external notifier to tail.
pub struct JsonlChannel {
    path: PathBuf,
}

impl JsonlChannel {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EscalationChannel for JsonlChannel {
    fn send(
        &self,
        recipients: &[String],
        payload: &EscalationPayload,
    ) -> Result<(), EscalationError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| EscalationError::IoError {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut line = serde_json::to_string(&EscalationLine {
            recipients,
            payload,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| EscalationError::IoError {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| EscalationError::IoError {
                path: self.path.clone(),
                source,
            })
    }
}
