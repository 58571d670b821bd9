// conflict.rs — Conflict: a recorded policy violation.
//
// A conflict ties one agent, one action and one violated policy together.
// Lifecycle:
//   Open → Resolving       (claimed by exactly one resolver)
//   Resolving → Resolved   (entry removed from the registry)
//   Resolving → Escalated  (entry retained, status flipped)
//   Resolving → Open       (claim released untouched)
// There is no way back from Escalated; re-detecting the same violation
// creates a new conflict with a new id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arb_policy::{Action, Severity};

/// Where a registered conflict is in its lifecycle.
///
/// Resolved conflicts are removed from the registry, so only these
/// states are ever observed on a stored record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Open,
    /// Claimed by a resolver that is planning or applying remediation.
    Resolving,
    Escalated,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStatus::Open => write!(f, "open"),
            ConflictStatus::Resolving => write!(f, "resolving"),
            ConflictStatus::Escalated => write!(f, "escalated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique id, generated on creation and never reused.
    pub conflict_id: Uuid,
    /// The agent whose action caused the violation.
    pub related_agent_id: String,
    /// The offending action.
    pub action: Action,
    /// The violated policy.
    pub policy_id: String,
    /// Human-readable description of the violation.
    pub violation_details: String,
    pub severity: Severity,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
}

impl Conflict {
    /// Create a new open conflict with a fresh v4 id.
    pub fn new(
        related_agent_id: impl Into<String>,
        action: Action,
        policy_id: impl Into<String>,
        violation_details: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            conflict_id: Uuid::new_v4(),
            related_agent_id: related_agent_id.into(),
            action,
            policy_id: policy_id.into(),
            violation_details: violation_details.into(),
            severity,
            status: ConflictStatus::Open,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conflict {} [{}] agent '{}' violated '{}': {}",
            self.conflict_id, self.severity, self.related_agent_id, self.policy_id,
            self.violation_details
        )
    }
}
