// store.rs — The set of active policies and whole-set evaluation.
//
// The store keeps policies sorted by descending priority (ties in registration
// order), so `evaluate_all()` can snapshot the list and walk it without
// re-sorting. The lock is only held to copy `Arc`s out; evaluation itself never
// runs under it.
//
// Every policy gets exactly one result per evaluation:
//   Ok(verdict)      → the verdict
//   Err(e)           → violation "policy '<id>' failed to evaluate: <e>"
//   panic            → violation "policy '<id>' failed to evaluate: panicked: ..."
//   timeout          → violation "policy '<id>' timed out after <n> ms"

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::bounded::{self, Pending};
use crate::error::{BoundedError, PolicyError};
use crate::policy::{EvaluationResult, Policy};

/// Evaluation settings for a [`PolicyStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Per-policy evaluation budget in milliseconds. 0 disables the bound.
    pub timeout_ms: u64,
    /// Evaluate the policies for one action concurrently.
    pub parallel: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            parallel: true,
        }
    }
}

impl EvaluationConfig {
    /// The evaluation budget, or `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// One policy's verdict on one action.
#[derive(Clone)]
pub struct PolicyEvaluation {
    pub policy: Arc<dyn Policy>,
    pub result: EvaluationResult,
}

impl fmt::Debug for PolicyEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEvaluation")
            .field("policy_id", &self.policy.policy_id())
            .field("result", &self.result)
            .finish()
    }
}

/// Holds the active policies and evaluates actions against all of them.
pub struct PolicyStore {
    config: EvaluationConfig,
    policies: RwLock<Vec<Arc<dyn Policy>>>,
}

impl PolicyStore {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            config,
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Register a policy. Fails if its id is empty or already registered.
    pub fn register(&self, policy: Arc<dyn Policy>) -> Result<(), PolicyError> {
        let policy_id = policy.policy_id().to_string();
        if policy_id.trim().is_empty() {
            return Err(PolicyError::Validation(
                "policy_id must not be empty".to_string(),
            ));
        }
        if policy_id.chars().any(char::is_control) {
            return Err(PolicyError::Validation(format!(
                "policy_id {:?} contains control characters",
                policy_id
            )));
        }

        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        if policies.iter().any(|p| p.policy_id() == policy_id) {
            return Err(PolicyError::DuplicatePolicy { policy_id });
        }

        // Insert after every policy of equal or higher priority: keeps the
        // list in evaluation order and preserves registration order on ties.
        let priority = policy.priority();
        let at = policies
            .iter()
            .position(|p| p.priority() < priority)
            .unwrap_or(policies.len());
        policies.insert(at, policy);

        tracing::debug!(policy_id = %policy_id, priority, "policy registered");
        Ok(())
    }

    /// Remove a policy. Returns whether it was present.
    pub fn unregister(&self, policy_id: &str) -> bool {
        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        let before = policies.len();
        policies.retain(|p| p.policy_id() != policy_id);
        let removed = policies.len() != before;
        if removed {
            tracing::debug!(policy_id, "policy unregistered");
        } else {
            tracing::warn!(policy_id, "policy not registered; nothing to unregister");
        }
        removed
    }

    pub fn get(&self, policy_id: &str) -> Option<Arc<dyn Policy>> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.policy_id() == policy_id)
            .cloned()
    }

    /// Registered policy ids in evaluation order.
    pub fn policy_ids(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|p| p.policy_id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.policies.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate an action against every registered policy.
    ///
    /// Returns one [`PolicyEvaluation`] per policy, highest priority first.
    pub fn evaluate_all(&self, action: &Action) -> Vec<PolicyEvaluation> {
        let policies = self.snapshot();
        if policies.is_empty() {
            return Vec::new();
        }

        tracing::debug!(
            agent_id = %action.agent_id,
            kind = %action.kind,
            policies = policies.len(),
            "evaluating action"
        );

        let action = Arc::new(action.clone());
        let timeout = self.config.timeout();

        let outcomes = if self.config.parallel && policies.len() > 1 {
            evaluate_parallel(&policies, &action, timeout)
        } else {
            evaluate_sequential(&policies, &action, timeout)
        };

        policies
            .into_iter()
            .zip(outcomes)
            .map(|(policy, outcome)| {
                let result = settle(policy.as_ref(), outcome);
                PolicyEvaluation { policy, result }
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Policy>> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(EvaluationConfig::default())
    }
}

type EvalOutcome = Result<Result<EvaluationResult, PolicyError>, BoundedError>;

fn worker_name(policy: &dyn Policy) -> String {
    format!("arb-policy-{}", policy.policy_id())
}

fn evaluate_sequential(
    policies: &[Arc<dyn Policy>],
    action: &Arc<Action>,
    timeout: Option<Duration>,
) -> Vec<EvalOutcome> {
    policies
        .iter()
        .map(|policy| {
            let p = Arc::clone(policy);
            let a = Arc::clone(action);
            bounded::run_bounded(&worker_name(policy.as_ref()), timeout, move || {
                p.evaluate(&a)
            })
        })
        .collect()
}

fn evaluate_parallel(
    policies: &[Arc<dyn Policy>],
    action: &Arc<Action>,
    timeout: Option<Duration>,
) -> Vec<EvalOutcome> {
    // All workers start together, so they share one deadline.
    let started = Instant::now();
    let pending: Vec<Pending<_>> = policies
        .iter()
        .map(|policy| {
            let p = Arc::clone(policy);
            let a = Arc::clone(action);
            bounded::spawn(&worker_name(policy.as_ref()), move || p.evaluate(&a))
        })
        .collect();

    pending
        .into_iter()
        .map(|p| match timeout {
            Some(budget) => p.wait_until(started + budget, budget),
            None => p.wait(),
        })
        .collect()
}

fn settle(policy: &dyn Policy, outcome: EvalOutcome) -> EvaluationResult {
    let policy_id = policy.policy_id();
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::warn!(policy_id, error = %e, "policy evaluation failed; treating as violation");
            EvaluationResult::violation(format!("policy '{}' failed to evaluate: {}", policy_id, e))
        }
        Err(BoundedError::TimedOut(budget)) => {
            tracing::warn!(
                policy_id,
                budget_ms = budget.as_millis() as u64,
                overrunning = bounded::overrunning(),
                "policy evaluation timed out; treating as violation"
            );
            EvaluationResult::violation(format!(
                "policy '{}' timed out after {} ms",
                policy_id,
                budget.as_millis()
            ))
        }
        Err(e) => {
            tracing::error!(policy_id, error = %e, "policy evaluation aborted; treating as violation");
            EvaluationResult::violation(format!("policy '{}' failed to evaluate: {}", policy_id, e))
        }
    }
}
