// policy.rs — The Policy capability and its evaluation result.
//
// Policies are opaque to the core. The embedding application supplies concrete
// types implementing `Policy`; the store only reads identity, priority and
// severity, and calls `evaluate()`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::PolicyError;

/// How serious a violation of a policy is.
///
/// Ordered from least to most severe, so `Severity::High > Severity::Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// The verdict of one policy on one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// True if the action complies with the policy.
    pub compliant: bool,
    /// Optional human-readable detail, usually set on violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EvaluationResult {
    /// The action complies.
    pub fn compliant() -> Self {
        Self {
            compliant: true,
            message: None,
        }
    }

    /// The action violates the policy for the given reason.
    pub fn violation(message: impl Into<String>) -> Self {
        Self {
            compliant: false,
            message: Some(message.into()),
        }
    }
}

/// A rule that judges an action as compliant or not.
///
/// Implementations must be `Send + Sync`: the store may evaluate several
/// policies for one action on worker threads at the same time.
pub trait Policy: Send + Sync {
    /// Unique identifier within a store.
    fn policy_id(&self) -> &str;

    /// Short human-readable name.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Higher values are evaluated first.
    fn priority(&self) -> i32;

    /// Severity assigned to conflicts raised by this policy.
    fn severity(&self) -> Severity {
        Severity::Medium
    }

    /// Judge an action. Returning `Err` means the policy could not decide;
    /// the store treats that as a violation.
    fn evaluate(&self, action: &Action) -> Result<EvaluationResult, PolicyError>;
}

type Predicate = dyn Fn(&Action) -> Result<EvaluationResult, PolicyError> + Send + Sync;

/// A policy built from a closure.
///
/// Useful for embedders whose rules are plain Rust code, and for tests.
pub struct PredicatePolicy {
    policy_id: String,
    name: String,
    description: String,
    priority: i32,
    severity: Severity,
    predicate: Box<Predicate>,
}

impl PredicatePolicy {
    pub fn new<F>(policy_id: impl Into<String>, priority: i32, predicate: F) -> Self
    where
        F: Fn(&Action) -> Result<EvaluationResult, PolicyError> + Send + Sync + 'static,
    {
        let policy_id = policy_id.into();
        Self {
            name: policy_id.clone(),
            policy_id,
            description: String::new(),
            priority,
            severity: Severity::default(),
            predicate: Box::new(predicate),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl fmt::Debug for PredicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatePolicy")
            .field("policy_id", &self.policy_id)
            .field("priority", &self.priority)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

impl Policy for PredicatePolicy {
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
        (self.predicate)(action)
    }
}
