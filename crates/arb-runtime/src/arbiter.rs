// arbiter.rs — Arbiter: the conflict pipeline wired from one config.
//
// handle_action(agent_id, action):
//   detect → (conflicts?) → resolve → (unresolved?) → escalate
//
// The arbiter is shared across threads; every component it owns is
// internally synchronized, so concurrent handle_action calls need no outer
// lock. The registry is the only mutable state they share.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use arb_conflict::{
    BlockActionStrategy, Conflict, ConflictDetector, ConflictRegistry, ConflictResolver,
    ConflictStatus, EscalatedConflict, EventDispatcher, JsonlEventSink, Resolution,
    ResolutionEngine, ResolutionStrategy,
};
use arb_escalation::{EscalationChannel, EscalationManager};
use arb_policy::{Action, Policy, PolicyStore};

use crate::config::ArbiterConfig;
use crate::error::ArbiterError;

/// What happened to one submitted action.
#[derive(Debug, Serialize)]
pub struct ActionOutcome {
    pub agent_id: String,
    /// Conflicts detected for the action, with their status after resolution.
    pub conflicts: Vec<Conflict>,
    /// Resolutions that were generated and applied.
    pub resolutions: Vec<Resolution>,
    /// Conflicts handed to escalation.
    pub escalated: Vec<EscalatedConflict>,
}

impl ActionOutcome {
    /// True when no policy objected to the action.
    pub fn is_compliant(&self) -> bool {
        self.conflicts.is_empty()
    }
}

pub struct Arbiter {
    config: ArbiterConfig,
    policies: Arc<PolicyStore>,
    registry: Arc<ConflictRegistry>,
    engine: Arc<ResolutionEngine>,
    escalation: Arc<EscalationManager>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
}

impl Arbiter {
    /// Build the pipeline and register the policies and strategies named in
    /// `config`. Fails on an invalid or duplicate configured policy.
    pub fn new(config: ArbiterConfig) -> Result<Self, ArbiterError> {
        let policies = Arc::new(PolicyStore::new(config.evaluation.clone()));
        for policy in &config.capability_policies {
            policy.validate()?;
            policies.register(Arc::new(policy.clone()))?;
        }

        let engine = Arc::new(ResolutionEngine::new(config.resolution.clone()));
        for block in &config.block_strategies {
            engine.register_strategy(block.policy_id.clone(), Arc::new(BlockActionStrategy));
        }

        let mut events = EventDispatcher::new();
        if let Some(path) = &config.events_log {
            events.add_sink(Box::new(JsonlEventSink::new(path)));
        }
        let events = Arc::new(events);

        let registry = Arc::new(ConflictRegistry::new());
        let escalation = Arc::new(EscalationManager::new(config.escalation.clone()));

        let detector = ConflictDetector::with_events(
            Arc::clone(&policies),
            Arc::clone(&registry),
            Arc::clone(&events),
        );
        let resolver = ConflictResolver::new(Arc::clone(&registry), Arc::clone(&engine))
            .with_escalator(escalation.clone())
            .with_events(events);

        tracing::info!(
            policies = policies.len(),
            strategies = config.block_strategies.len(),
            escalation_channel = %config.escalation.channel,
            "arbiter ready"
        );

        Ok(Self {
            config,
            policies,
            registry,
            engine,
            escalation,
            detector,
            resolver,
        })
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn registry(&self) -> &Arc<ConflictRegistry> {
        &self.registry
    }

    pub fn escalation(&self) -> &Arc<EscalationManager> {
        &self.escalation
    }

    pub fn register_policy(&self, policy: Arc<dyn Policy>) -> Result<(), ArbiterError> {
        Ok(self.policies.register(policy)?)
    }

    pub fn unregister_policy(&self, policy_id: &str) -> bool {
        self.policies.unregister(policy_id)
    }

    /// Register the remediation for conflicts against `policy_id`, replacing
    /// any previous one.
    pub fn register_strategy(
        &self,
        policy_id: impl Into<String>,
        strategy: Arc<dyn ResolutionStrategy>,
    ) {
        self.engine.register_strategy(policy_id, strategy);
    }

    pub fn register_escalation_channel(
        &self,
        name: impl Into<String>,
        channel: Arc<dyn EscalationChannel>,
    ) {
        self.escalation.register_channel(name, channel);
    }

    /// Run one action through detection, resolution and escalation.
    ///
    /// Only malformed input is an error; everything else is reported in the
    /// outcome.
    pub fn handle_action(
        &self,
        agent_id: &str,
        action: &Action,
    ) -> Result<ActionOutcome, ArbiterError> {
        let mut conflicts = self.detector.detect(agent_id, action)?;
        if conflicts.is_empty() {
            tracing::debug!(agent_id, kind = %action.kind, "action compliant");
            return Ok(ActionOutcome {
                agent_id: agent_id.to_string(),
                conflicts,
                resolutions: Vec::new(),
                escalated: Vec::new(),
            });
        }

        let report = self.resolver.resolve_with_report(&conflicts);
        for conflict in &mut conflicts {
            if report
                .escalated
                .iter()
                .any(|e| e.conflict_id == conflict.conflict_id)
            {
                conflict.status = ConflictStatus::Escalated;
            }
        }

        Ok(ActionOutcome {
            agent_id: agent_id.to_string(),
            conflicts,
            resolutions: report.resolved,
            escalated: report.escalated,
        })
    }

    /// Re-run resolution for conflicts still open, e.g. after a strategy
    /// was registered.
    pub fn resolve_open(&self) -> Vec<Resolution> {
        self.resolver.resolve_conflicts(&self.registry.list_open())
    }

    /// Conflicts awaiting resolution.
    pub fn open_conflicts(&self) -> Vec<Conflict> {
        self.registry.list_open()
    }

    /// Every registered conflict, open and escalated.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.registry.list_all()
    }

    pub fn conflict(&self, conflict_id: Uuid) -> Option<Conflict> {
        self.registry.get(conflict_id)
    }
}
