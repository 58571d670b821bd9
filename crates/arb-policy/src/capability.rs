// capability.rs — Declarative capability policy.
//
// A capability policy governs a family of action kinds (glob patterns such as
// "write_*") and requires the acting agent to hold a matching grant. Actions
// whose kind is not governed are compliant. This is the shape used by the
// configuration loader, so embedders can express "no writes without write
// access" without writing code.
//
// Matching is fail-closed: a malformed pattern never matches, and a resource
// containing path traversal never matches any grant.

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::PolicyError;
use crate::policy::{EvaluationResult, Policy, Severity};

/// Grants an agent permission to perform matching kinds on matching resources.
///
/// Example: `{ agent_id: "B", kind: "write_*", resource_pattern: "D*" }`
/// lets agent B perform any write on resources starting with "D".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityGrant {
    /// The agent holding the grant, or "*" for every agent.
    pub agent_id: String,
    /// Glob pattern matching action kinds.
    pub kind: String,
    /// Glob pattern matching target resources.
    #[serde(default = "match_all")]
    pub resource_pattern: String,
}

fn match_all() -> String {
    "*".to_string()
}

impl CapabilityGrant {
    fn covers(&self, action: &Action) -> bool {
        (self.agent_id == "*" || self.agent_id == action.agent_id)
            && matches_pattern(&self.kind, &action.kind)
            && matches_pattern(&self.resource_pattern, &action.resource)
    }
}

/// A policy that demands a capability grant for the action kinds it governs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityPolicy {
    pub policy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub severity: Severity,
    /// Glob patterns of the action kinds this policy applies to.
    pub governs: Vec<String>,
    #[serde(default)]
    pub grants: Vec<CapabilityGrant>,
}

impl CapabilityPolicy {
    /// Check that every pattern parses, so typos surface at load time
    /// rather than as silent denials.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.governs.is_empty() {
            return Err(PolicyError::Validation(format!(
                "capability policy '{}' governs no action kinds",
                self.policy_id
            )));
        }
        let patterns = self
            .governs
            .iter()
            .chain(self.grants.iter().flat_map(|g| [&g.kind, &g.resource_pattern]));
        for pattern in patterns {
            Pattern::new(pattern).map_err(|e| PolicyError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn governs(&self, kind: &str) -> bool {
        self.governs.iter().any(|p| matches_pattern(p, kind))
    }
}

impl Policy for CapabilityPolicy {
    fn policy_id(&self) -> &str {
        &self.policy_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn evaluate(&self, action: &Action) -> Result<EvaluationResult, PolicyError> {
        if !self.governs(&action.kind) {
            return Ok(EvaluationResult::compliant());
        }

        if contains_path_traversal(&action.resource) {
            return Ok(EvaluationResult::violation(format!(
                "path traversal detected in resource '{}'",
                action.resource
            )));
        }

        if self.grants.iter().any(|g| g.covers(action)) {
            Ok(EvaluationResult::compliant())
        } else {
            Ok(EvaluationResult::violation(format!(
                "agent '{}' holds no grant for '{}' on '{}'",
                action.agent_id, action.kind, action.resource
            )))
        }
    }
}

/// Invalid patterns never match (fail-closed, not fail-open).
fn matches_pattern(pattern: &str, value: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(value),
        Err(_) => false,
    }
}

fn contains_path_traversal(resource: &str) -> bool {
    resource.contains("..") || resource.contains("%2e%2e") || resource.contains("%2E%2E")
}
