// resolution.rs — Resolutions and the strategies that produce them.
//
// A ResolutionStrategy is registered per policy id. For a conflict against
// that policy it first *plans* (an ordered list of remediation actions plus an
// explanation) and later *applies* the plan. Keeping the two steps apart lets
// the engine bound each one and report plan and apply failures separately.
//
// A Resolution carries a handle to the strategy that planned it, so
// `resolution.apply()` always runs the matching remediation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::conflict::Conflict;
use crate::error::ResolutionError;

/// One remediation step (e.g., "block_action", "revoke_grant", "notify_agent").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub kind: String,
    /// What the step acts on (an agent id, a resource, ...).
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

impl RemediationAction {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// What a strategy intends to do about a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPlan {
    pub actions: Vec<RemediationAction>,
    pub explanation: String,
}

/// Remediation capability for conflicts against one (or more) policies.
pub trait ResolutionStrategy: Send + Sync {
    /// Name used in logs and serialized resolutions.
    fn name(&self) -> &str;

    /// Decide how to remediate a conflict.
    fn plan(&self, conflict: &Conflict) -> Result<ResolutionPlan, ResolutionError>;

    /// Carry out a resolution previously planned by this strategy.
    fn apply(&self, resolution: &Resolution) -> Result<(), ResolutionError>;
}

/// A generated remediation for one conflict.
///
/// Short-lived: returned to the caller of a resolve call and not retained by
/// the core.
#[derive(Clone)]
pub struct Resolution {
    pub resolution_id: Uuid,
    /// The conflict this resolution addresses.
    pub conflict_id: Uuid,
    /// The violated policy, copied from the conflict.
    pub policy_id: String,
    /// Remediation steps, in the order they are applied.
    pub actions: Vec<RemediationAction>,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
    strategy: Arc<dyn ResolutionStrategy>,
}

impl Resolution {
    pub(crate) fn new(
        conflict: &Conflict,
        plan: ResolutionPlan,
        strategy: Arc<dyn ResolutionStrategy>,
    ) -> Self {
        Self {
            resolution_id: Uuid::new_v4(),
            conflict_id: conflict.conflict_id,
            policy_id: conflict.policy_id.clone(),
            actions: plan.actions,
            explanation: plan.explanation,
            created_at: Utc::now(),
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Perform the remediation. Unbounded; the engine wraps this in its
    /// apply timeout.
    pub fn apply(&self) -> Result<(), ResolutionError> {
        self.strategy.apply(self)
    }

    /// A plain-data view of this resolution for the query surface.
    pub fn record(&self) -> ResolutionRecord {
        ResolutionRecord {
            resolution_id: self.resolution_id,
            conflict_id: self.conflict_id,
            policy_id: self.policy_id.clone(),
            strategy: self.strategy.name().to_string(),
            actions: self.actions.clone(),
            explanation: self.explanation.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("resolution_id", &self.resolution_id)
            .field("conflict_id", &self.conflict_id)
            .field("policy_id", &self.policy_id)
            .field("strategy", &self.strategy.name())
            .field("actions", &self.actions)
            .field("explanation", &self.explanation)
            .finish()
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.record().serialize(serializer)
    }
}

/// Serializable snapshot of a [`Resolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub resolution_id: Uuid,
    pub conflict_id: Uuid,
    pub policy_id: String,
    pub strategy: String,
    pub actions: Vec<RemediationAction>,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

/// Blocks the offending action and tells the agent why.
///
/// The action has not been executed yet when the conflict is detected, so
/// refusing it is always possible; applying the plan records the block.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockActionStrategy;

impl ResolutionStrategy for BlockActionStrategy {
    fn name(&self) -> &str {
        "block_action"
    }

    fn plan(&self, conflict: &Conflict) -> Result<ResolutionPlan, ResolutionError> {
        let action = &conflict.action;
        Ok(ResolutionPlan {
            actions: vec![
                RemediationAction::new("block_action", &action.resource)
                    .with_parameter("agent_id", conflict.related_agent_id.as_str())
                    .with_parameter("kind", action.kind.as_str()),
                RemediationAction::new("notify_agent", &conflict.related_agent_id)
                    .with_parameter("message", conflict.violation_details.as_str()),
            ],
            explanation: format!(
                "blocked '{}' on '{}' by agent '{}': {}",
                action.kind, action.resource, conflict.related_agent_id, conflict.violation_details
            ),
        })
    }

    fn apply(&self, resolution: &Resolution) -> Result<(), ResolutionError> {
        for step in &resolution.actions {
            tracing::info!(
                resolution_id = %resolution.resolution_id,
                conflict_id = %resolution.conflict_id,
                step = %step.kind,
                target = %step.target,
                "remediation applied"
            );
        }
        Ok(())
    }
}
