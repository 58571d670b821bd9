// engine.rs — Resolution engine: strategy lookup, planning and application.
//
// Strategies are keyed by the violated policy id. For each conflict:
//   no strategy          → StrategyMissing   (conflict stays open)
//   plan errors/panics   → PlanFailed        (conflict stays open)
//   plan with no steps   → EmptyPlan         (conflict stays open)
//   otherwise            → a Resolution
// Failures are per conflict; the rest of the batch is unaffected.
//
// Planning and application both run under the configured apply budget, so a
// hung strategy cannot stall the caller.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arb_policy::{run_bounded, BoundedError};

use crate::conflict::Conflict;
use crate::error::ResolutionError;
use crate::resolution::{Resolution, ResolutionStrategy};

/// Resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Budget in milliseconds for planning and for applying one resolution.
    /// 0 disables the bound.
    pub apply_timeout_ms: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            apply_timeout_ms: 5_000,
        }
    }
}

impl ResolutionConfig {
    pub fn apply_timeout(&self) -> Option<Duration> {
        (self.apply_timeout_ms > 0).then(|| Duration::from_millis(self.apply_timeout_ms))
    }
}

/// A conflict the engine could not produce a resolution for.
#[derive(Debug, Clone)]
pub struct UnresolvedConflict {
    pub conflict: Conflict,
    pub reason: ResolutionError,
}

/// Result of [`ResolutionEngine::generate_resolutions`].
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    pub resolutions: Vec<Resolution>,
    pub unresolved: Vec<UnresolvedConflict>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Failed { reason: String },
}

/// Outcome of applying one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub resolution_id: Uuid,
    pub conflict_id: Uuid,
    #[serde(flatten)]
    pub status: ApplyStatus,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        self.status == ApplyStatus::Applied
    }
}

pub struct ResolutionEngine {
    config: ResolutionConfig,
    strategies: RwLock<HashMap<String, Arc<dyn ResolutionStrategy>>>,
}

impl ResolutionEngine {
    pub fn new(config: ResolutionConfig) -> Self {
        Self {
            config,
            strategies: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Register the strategy for a policy, returning any strategy it replaces.
    pub fn register_strategy(
        &self,
        policy_id: impl Into<String>,
        strategy: Arc<dyn ResolutionStrategy>,
    ) -> Option<Arc<dyn ResolutionStrategy>> {
        let policy_id = policy_id.into();
        let name = strategy.name().to_string();
        let previous = self
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(policy_id.clone(), strategy);
        if let Some(old) = &previous {
            tracing::warn!(policy_id = %policy_id, replaced = old.name(), strategy = %name, "resolution strategy replaced");
        } else {
            tracing::debug!(policy_id = %policy_id, strategy = %name, "resolution strategy registered");
        }
        previous
    }

    pub fn unregister_strategy(&self, policy_id: &str) -> Option<Arc<dyn ResolutionStrategy>> {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(policy_id)
    }

    pub fn has_strategy(&self, policy_id: &str) -> bool {
        self.strategy_for(policy_id).is_some()
    }

    fn strategy_for(&self, policy_id: &str) -> Option<Arc<dyn ResolutionStrategy>> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(policy_id)
            .cloned()
    }

    /// Attempt one resolution per conflict.
    pub fn generate_resolutions(&self, conflicts: &[Conflict]) -> GenerationOutcome {
        let mut outcome = GenerationOutcome::default();
        for conflict in conflicts {
            match self.generate_one(conflict) {
                Ok(resolution) => {
                    tracing::debug!(
                        conflict_id = %conflict.conflict_id,
                        resolution_id = %resolution.resolution_id,
                        strategy = resolution.strategy_name(),
                        "resolution generated"
                    );
                    outcome.resolutions.push(resolution);
                }
                Err(reason) => {
                    tracing::warn!(
                        conflict_id = %conflict.conflict_id,
                        policy_id = %conflict.policy_id,
                        error = %reason,
                        "no resolution generated"
                    );
                    outcome.unresolved.push(UnresolvedConflict {
                        conflict: conflict.clone(),
                        reason,
                    });
                }
            }
        }
        outcome
    }

    fn generate_one(&self, conflict: &Conflict) -> Result<Resolution, ResolutionError> {
        let strategy = self.strategy_for(&conflict.policy_id).ok_or_else(|| {
            ResolutionError::StrategyMissing {
                policy_id: conflict.policy_id.clone(),
            }
        })?;
        let name = strategy.name().to_string();

        let planner = Arc::clone(&strategy);
        let subject = conflict.clone();
        let plan = run_bounded(
            &format!("arb-plan-{}", name),
            self.config.apply_timeout(),
            move || planner.plan(&subject),
        )
        .map_err(|e| ResolutionError::PlanFailed {
            strategy: name.clone(),
            reason: e.to_string(),
        })??;

        if plan.actions.is_empty() {
            return Err(ResolutionError::EmptyPlan { strategy: name });
        }
        Ok(Resolution::new(conflict, plan, strategy))
    }

    /// Apply each resolution independently.
    ///
    /// Returns one outcome per input resolution, in input order.
    pub fn apply_resolutions(&self, resolutions: &[Resolution]) -> Vec<ApplyOutcome> {
        resolutions.iter().map(|r| self.apply_one(r)).collect()
    }

    fn apply_one(&self, resolution: &Resolution) -> ApplyOutcome {
        let task = resolution.clone();
        let result = run_bounded(
            &format!("arb-apply-{}", resolution.strategy_name()),
            self.config.apply_timeout(),
            move || task.apply(),
        );

        let status = match result {
            Ok(Ok(())) => {
                tracing::debug!(resolution_id = %resolution.resolution_id, "resolution applied");
                ApplyStatus::Applied
            }
            Ok(Err(e)) => failed(resolution, e.to_string()),
            Err(BoundedError::TimedOut(budget)) => failed(
                resolution,
                format!("apply timed out after {} ms", budget.as_millis()),
            ),
            Err(e) => failed(resolution, format!("apply aborted: {}", e)),
        };

        ApplyOutcome {
            resolution_id: resolution.resolution_id,
            conflict_id: resolution.conflict_id,
            status,
        }
    }
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new(ResolutionConfig::default())
    }
}

fn failed(resolution: &Resolution, reason: String) -> ApplyStatus {
    tracing::warn!(
        resolution_id = %resolution.resolution_id,
        conflict_id = %resolution.conflict_id,
        reason = %reason,
        "resolution failed to apply"
    );
    ApplyStatus::Failed { reason }
}
