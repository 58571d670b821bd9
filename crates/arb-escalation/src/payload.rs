// payload.rs — What an escalation channel receives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arb_conflict::Conflict;
use arb_policy::{Action, Severity};

/// Conflict details packaged for a human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPayload {
    pub conflict_id: Uuid,
    pub related_agent_id: String,
    pub policy_id: String,
    pub violation_details: String,
    pub severity: Severity,
    pub action: Action,
    /// When the conflict was detected.
    pub timestamp: DateTime<Utc>,
    /// Why automated resolution gave up, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EscalationPayload {
    pub fn from_conflict(conflict: &Conflict) -> Self {
        Self {
            conflict_id: conflict.conflict_id,
            related_agent_id: conflict.related_agent_id.clone(),
            policy_id: conflict.policy_id.clone(),
            violation_details: conflict.violation_details.clone(),
            severity: conflict.severity,
            action: conflict.action.clone(),
            timestamp: conflict.created_at,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Plain-text rendering for channels that carry a message body.
    pub fn render_text(&self) -> String {
        let mut text = format!(
            "Unresolved conflict {}\n\
             agent:    {}\n\
             policy:   {}\n\
             severity: {}\n\
             details:  {}\n\
             action:   {} on '{}'\n\
             detected: {}\n",
            self.conflict_id,
            self.related_agent_id,
            self.policy_id,
            self.severity,
            self.violation_details,
            self.action.kind,
            self.action.resource,
            self.timestamp.to_rfc3339(),
        );
        if let Some(reason) = &self.reason {
            text.push_str(&format!("reason:   {}\n", reason));
        }
        text
    }
}
