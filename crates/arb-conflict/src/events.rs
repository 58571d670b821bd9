// events.rs — Conflict lifecycle events and sink dispatch.
//
// The detector and resolver emit an event at each lifecycle point. Sinks
// (a JSONL log, a metrics bridge, a UI feed) subscribe by registering with the
// dispatcher. Sinks observe; they cannot veto or alter the pipeline.
//
// Dispatch is synchronous and cheap by contract. A failing sink is logged and
// skipped; the remaining sinks still receive the event.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arb_policy::Severity;

use crate::conflict::Conflict;
use crate::error::ConflictError;

/// Events emitted as conflicts move through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ConflictEvent {
    /// A policy violation was recorded.
    ConflictDetected {
        conflict_id: Uuid,
        agent_id: String,
        policy_id: String,
        severity: Severity,
        timestamp: DateTime<Utc>,
    },

    /// A resolution was applied and the conflict removed from the registry.
    ConflictResolved {
        conflict_id: Uuid,
        resolution_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A generated resolution failed to apply.
    ResolutionFailed {
        conflict_id: Uuid,
        resolution_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The conflict was handed to the escalation path.
    ConflictEscalated {
        conflict_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ConflictEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            ConflictEvent::ConflictDetected { .. } => "conflict_detected",
            ConflictEvent::ConflictResolved { .. } => "conflict_resolved",
            ConflictEvent::ResolutionFailed { .. } => "resolution_failed",
            ConflictEvent::ConflictEscalated { .. } => "conflict_escalated",
        }
    }

    pub fn conflict_id(&self) -> Uuid {
        match self {
            ConflictEvent::ConflictDetected { conflict_id, .. }
            | ConflictEvent::ConflictResolved { conflict_id, .. }
            | ConflictEvent::ResolutionFailed { conflict_id, .. }
            | ConflictEvent::ConflictEscalated { conflict_id, .. } => *conflict_id,
        }
    }

    pub fn detected(conflict: &Conflict) -> Self {
        ConflictEvent::ConflictDetected {
            conflict_id: conflict.conflict_id,
            agent_id: conflict.related_agent_id.clone(),
            policy_id: conflict.policy_id.clone(),
            severity: conflict.severity,
            timestamp: Utc::now(),
        }
    }

    pub fn resolved(conflict_id: Uuid, resolution_id: Uuid) -> Self {
        ConflictEvent::ConflictResolved {
            conflict_id,
            resolution_id,
            timestamp: Utc::now(),
        }
    }

    pub fn resolution_failed(conflict_id: Uuid, resolution_id: Uuid, reason: &str) -> Self {
        ConflictEvent::ResolutionFailed {
            conflict_id,
            resolution_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn escalated(conflict_id: Uuid, reason: &str) -> Self {
        ConflictEvent::ConflictEscalated {
            conflict_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives conflict lifecycle events.
///
/// `Send + Sync` because one dispatcher is shared by every concurrent caller.
pub trait EventSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the pipeline.
    fn send(&self, event: &ConflictEvent) -> Result<(), ConflictError>;
}

/// Appends events as JSON lines to a file.
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventSink {
    fn send(&self, event: &ConflictEvent) -> Result<(), ConflictError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConflictError::IoError {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        // One write per event keeps concurrent appends line-atomic in practice.
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ConflictError::IoError {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| ConflictError::IoError {
                path: self.path.clone(),
                source,
            })
    }
}

/// Fans events out to every registered sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatch an event to all sinks.
    pub fn dispatch(&self, event: &ConflictEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(
                    event_type = event.event_type(),
                    error = %e,
                    "event sink error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_policy::Action;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl EventSink for Recording {
        fn send(&self, event: &ConflictEvent) -> Result<(), ConflictError> {
            self.0.lock().unwrap().push(event.event_type().to_string());
            Ok(())
        }
    }

    struct Failing;

    impl EventSink for Failing {
        fn send(&self, _event: &ConflictEvent) -> Result<(), ConflictError> {
            Err(ConflictError::Validation("sink offline".to_string()))
        }
    }

    fn sample_conflict() -> Conflict {
        Conflict::new(
            "A",
            Action::new("A", "write_data", "D1"),
            "p1",
            "denied",
            Severity::Medium,
        )
    }

    #[test]
    fn event_serialization_is_tagged() {
        let event = ConflictEvent::detected(&sample_conflict());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"conflict_detected\""));

        let restored: ConflictEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = JsonlEventSink::new(&path);
        let conflict = sample_conflict();

        sink.send(&ConflictEvent::detected(&conflict)).unwrap();
        sink.send(&ConflictEvent::escalated(conflict.conflict_id, "no strategy"))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("conflict_escalated"));
    }

    #[test]
    fn failing_sink_does_not_starve_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(Failing));
        dispatcher.add_sink(Box::new(Recording(Arc::clone(&seen))));
        assert_eq!(dispatcher.sink_count(), 2);

        let id = Uuid::new_v4();
        dispatcher.dispatch(&ConflictEvent::resolved(id, Uuid::new_v4()));

        assert_eq!(*seen.lock().unwrap(), vec!["conflict_resolved".to_string()]);
    }

    #[test]
    fn conflict_id_accessor_covers_all_variants() {
        let id = Uuid::new_v4();
        let rid = Uuid::new_v4();
        for event in [
            ConflictEvent::resolved(id, rid),
            ConflictEvent::resolution_failed(id, rid, "timeout"),
            ConflictEvent::escalated(id, "timeout"),
        ] {
            assert_eq!(event.conflict_id(), id);
        }
    }
}
