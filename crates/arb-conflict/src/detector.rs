// detector.rs — Turns non-compliant policy evaluations into conflicts.
//
// detect(agent_id, action):
//   1. Validate top-level input (the only hard failure of this layer).
//   2. Evaluate the action against every policy in the store.
//   3. For each violation: build a Conflict, insert it into the registry,
//      emit ConflictDetected, append it to the result.
//
// A registry failure mid-way is logged and the conflicts already recorded are
// returned. Conflicts inserted before a failure or a cancelled call stay in
// the registry; there is no rollback.

use std::sync::Arc;

use arb_policy::{Action, PolicyStore};

use crate::conflict::Conflict;
use crate::error::ConflictError;
use crate::events::{ConflictEvent, EventDispatcher};
use crate::registry::ConflictRegistry;

pub struct ConflictDetector {
    policies: Arc<PolicyStore>,
    registry: Arc<ConflictRegistry>,
    events: Arc<EventDispatcher>,
}

impl ConflictDetector {
    pub fn new(policies: Arc<PolicyStore>, registry: Arc<ConflictRegistry>) -> Self {
        Self::with_events(policies, registry, Arc::new(EventDispatcher::new()))
    }

    pub fn with_events(
        policies: Arc<PolicyStore>,
        registry: Arc<ConflictRegistry>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            policies,
            registry,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<ConflictRegistry> {
        &self.registry
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    /// Evaluate `action` on behalf of `agent_id` and record every violation.
    ///
    /// Returns an empty vector when the action is fully compliant. Only
    /// malformed input is returned as an error.
    pub fn detect(&self, agent_id: &str, action: &Action) -> Result<Vec<Conflict>, ConflictError> {
        validate_input(agent_id, action)?;

        tracing::debug!(agent_id, kind = %action.kind, resource = %action.resource, "detecting conflicts");

        let mut conflicts = Vec::new();
        for evaluation in self.policies.evaluate_all(action) {
            if evaluation.result.compliant {
                continue;
            }

            let policy = &evaluation.policy;
            let details = evaluation.result.message.unwrap_or_else(|| {
                format!("action violates policy '{}'", policy.policy_id())
            });
            let conflict = Conflict::new(
                agent_id,
                action.clone(),
                policy.policy_id(),
                details,
                policy.severity(),
            );

            if let Err(e) = self.registry.put(conflict.clone()) {
                tracing::error!(
                    agent_id,
                    conflict_id = %conflict.conflict_id,
                    error = %e,
                    "failed to record conflict; returning partial detection result"
                );
                break;
            }

            tracing::info!(
                conflict_id = %conflict.conflict_id,
                agent_id,
                policy_id = %conflict.policy_id,
                severity = %conflict.severity,
                "conflict detected"
            );
            self.events.dispatch(&ConflictEvent::detected(&conflict));
            conflicts.push(conflict);
        }

        Ok(conflicts)
    }
}

/// The caller identity comes from the authentication gate; an action that
/// names a different agent is rejected rather than silently re-attributed.
fn validate_input(agent_id: &str, action: &Action) -> Result<(), ConflictError> {
    if agent_id.trim().is_empty() {
        return Err(ConflictError::Validation("agent_id must not be empty".to_string()));
    }
    action
        .validate()
        .map_err(|e| ConflictError::Validation(e.to_string()))?;
    if action.agent_id != agent_id {
        return Err(ConflictError::Validation(format!(
            "action is attributed to agent '{}' but was submitted by '{}'",
            action.agent_id, agent_id
        )));
    }
    Ok(())
}
