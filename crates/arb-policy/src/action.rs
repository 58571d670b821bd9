// action.rs — The structured description of something an agent intends to do.
//
// Actions arrive from the transport layer already attributed to a verified
// caller. The core only reads them: policies inspect them, conflicts carry a
// copy, escalation payloads embed them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PolicyError;

/// An action proposed by an agent.
///
/// `attributes` is a `BTreeMap` so serialized actions have a stable key order,
/// which keeps escalation payloads and event logs diffable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The agent proposing the action.
    pub agent_id: String,
    /// What the agent wants to do (e.g., "write_data", "send_email").
    pub kind: String,
    /// The resource the action targets (e.g., "D1", "fs://workspace/a.txt").
    #[serde(default)]
    pub resource: String,
    /// Free-form attributes supplied by the caller.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Action {
    pub fn new(
        agent_id: impl Into<String>,
        kind: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: kind.into(),
            resource: resource.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Reject actions the pipeline cannot attribute or classify.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.agent_id.trim().is_empty() {
            return Err(PolicyError::Validation(
                "action has no agent_id".to_string(),
            ));
        }
        if self.kind.trim().is_empty() {
            return Err(PolicyError::Validation(format!(
                "action from agent '{}' has no kind",
                self.agent_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_queryable() {
        let action = Action::new("agent-a", "write_data", "D1")
            .with_attribute("bytes", 512)
            .with_attribute("reason", "nightly export");

        assert_eq!(action.attribute("bytes"), Some(&Value::from(512)));
        assert_eq!(
            action.attribute("reason").and_then(Value::as_str),
            Some("nightly export")
        );
        assert!(action.attribute("missing").is_none());
    }

    #[test]
    fn validate_rejects_missing_agent_and_kind() {
        assert!(Action::new("agent-a", "read_data", "D1").validate().is_ok());

        match Action::new("  ", "read_data", "D1").validate() {
            Err(PolicyError::Validation(msg)) => assert!(msg.contains("agent_id")),
            other => panic!("expected Validation, got {:?}", other),
        }
        match Action::new("agent-a", "", "D1").validate() {
            Err(PolicyError::Validation(msg)) => assert!(msg.contains("no kind")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let action: Action =
            serde_json::from_str(r#"{"agent_id": "B", "kind": "read_data"}"#).unwrap();
        assert_eq!(action.resource, "");
        assert!(action.attributes.is_empty());
    }
}
