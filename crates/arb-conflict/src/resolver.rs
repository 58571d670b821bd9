// resolver.rs — Orchestrates resolution and escalation for detected conflicts.
//
// resolve_with_report(conflicts):
//   1. Claim each input conflict once (Open → Resolving). Conflicts that are
//      unknown, escalated or claimed by another caller are skipped.
//   2. Generate resolutions, then apply them.
//   3. Applied      → remove from the registry, emit ConflictResolved.
//      Not applied  → emit ResolutionFailed, fall through to escalation.
//      No resolution or failed apply → mark Escalated and hand to the escalator.
//   4. Any claim still held is released back to Open.
//
// Only the claiming call plans, applies, removes or escalates a conflict, so
// concurrent resolvers never apply twice or both escalate and remove.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use arb_policy::run_bounded;

use crate::conflict::{Conflict, ConflictStatus};
use crate::engine::{ApplyOutcome, ApplyStatus, ResolutionEngine};
use crate::events::{ConflictEvent, EventDispatcher};
use crate::registry::ConflictRegistry;
use crate::resolution::Resolution;

/// Receives conflicts the pipeline could not resolve.
///
/// Implementations must not block awaiting human action; the resolver calls
/// `escalate` synchronously once per unresolved conflict.
pub trait Escalator: Send + Sync {
    fn escalate(&self, conflict: &Conflict, reason: &str);
}

/// A conflict handed to the escalation path by one resolve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalatedConflict {
    pub conflict_id: Uuid,
    pub reason: String,
}

/// Full per-conflict outcome of one resolve call.
#[derive(Debug, Default, Serialize)]
pub struct ResolveReport {
    /// Resolutions that were generated and applied; their conflicts are gone
    /// from the registry.
    pub resolved: Vec<Resolution>,
    /// Every apply attempt, successful or not.
    pub applied: Vec<ApplyOutcome>,
    /// Conflicts escalated by this call.
    pub escalated: Vec<EscalatedConflict>,
    /// Input conflicts that were duplicated, unknown, or no longer open.
    pub skipped: Vec<Uuid>,
}

pub struct ConflictResolver {
    registry: Arc<ConflictRegistry>,
    engine: Arc<ResolutionEngine>,
    escalator: Option<Arc<dyn Escalator>>,
    events: Arc<EventDispatcher>,
}

impl ConflictResolver {
    pub fn new(registry: Arc<ConflictRegistry>, engine: Arc<ResolutionEngine>) -> Self {
        Self {
            registry,
            engine,
            escalator: None,
            events: Arc::new(EventDispatcher::new()),
        }
    }

    pub fn with_escalator(mut self, escalator: Arc<dyn Escalator>) -> Self {
        self.escalator = Some(escalator);
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn engine(&self) -> &Arc<ResolutionEngine> {
        &self.engine
    }

    /// Resolve a batch of conflicts, returning the resolutions that took effect.
    ///
    /// The result never holds more entries than `conflicts`, and every
    /// returned resolution addresses one of them.
    pub fn resolve_conflicts(&self, conflicts: &[Conflict]) -> Vec<Resolution> {
        self.resolve_with_report(conflicts).resolved
    }

    pub fn resolve_with_report(&self, conflicts: &[Conflict]) -> ResolveReport {
        let mut report = ResolveReport::default();
        let candidates = self.claim(conflicts, &mut report.skipped);
        if candidates.is_empty() {
            return report;
        }

        tracing::debug!(count = candidates.len(), "resolving conflicts");

        let generated = self.engine.generate_resolutions(&candidates);
        let mut unresolved: Vec<(Conflict, String)> = generated
            .unresolved
            .into_iter()
            .map(|u| (u.conflict, u.reason.to_string()))
            .collect();

        let outcomes = self.engine.apply_resolutions(&generated.resolutions);
        for (resolution, outcome) in generated.resolutions.into_iter().zip(outcomes) {
            match &outcome.status {
                ApplyStatus::Applied => {
                    self.registry.remove(resolution.conflict_id);
                    tracing::info!(
                        conflict_id = %resolution.conflict_id,
                        resolution_id = %resolution.resolution_id,
                        "conflict resolved"
                    );
                    self.events.dispatch(&ConflictEvent::resolved(
                        resolution.conflict_id,
                        resolution.resolution_id,
                    ));
                    report.resolved.push(resolution);
                }
                ApplyStatus::Failed { reason } => {
                    self.events.dispatch(&ConflictEvent::resolution_failed(
                        resolution.conflict_id,
                        resolution.resolution_id,
                        reason,
                    ));
                    if let Some(conflict) = candidates
                        .iter()
                        .find(|c| c.conflict_id == resolution.conflict_id)
                    {
                        unresolved.push((conflict.clone(), reason.clone()));
                    }
                }
            }
            report.applied.push(outcome);
        }

        for (conflict, reason) in unresolved {
            let conflict_id = conflict.conflict_id;
            if self.escalate(conflict, &reason) {
                report.escalated.push(EscalatedConflict {
                    conflict_id,
                    reason,
                });
            }
        }

        for conflict in &candidates {
            if self.registry.release(conflict.conflict_id) {
                tracing::warn!(conflict_id = %conflict.conflict_id, "claim released without outcome");
            }
        }

        tracing::info!(
            resolved = report.resolved.len(),
            escalated = report.escalated.len(),
            skipped = report.skipped.len(),
            "resolve call finished"
        );
        report
    }

    /// Deduplicate the input and claim every conflict still open in the registry.
    fn claim(&self, conflicts: &[Conflict], skipped: &mut Vec<Uuid>) -> Vec<Conflict> {
        let mut seen = HashSet::new();
        let mut claimed = Vec::new();
        for conflict in conflicts {
            let conflict_id = conflict.conflict_id;
            if !seen.insert(conflict_id) {
                skipped.push(conflict_id);
                continue;
            }
            if let Some(stored) = self.registry.claim(conflict_id) {
                claimed.push(stored);
                continue;
            }
            match self.registry.get(conflict_id) {
                Some(stored) => {
                    tracing::debug!(%conflict_id, status = %stored.status, "conflict not open; skipping")
                }
                None => tracing::warn!(%conflict_id, "conflict not registered; skipping"),
            }
            skipped.push(conflict_id);
        }
        claimed
    }

    /// Mark a conflict escalated and hand it to the escalator.
    ///
    /// Returns false when the conflict was already escalated or removed.
    fn escalate(&self, mut conflict: Conflict, reason: &str) -> bool {
        let conflict_id = conflict.conflict_id;
        match self.registry.mark_escalated(conflict_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%conflict_id, "conflict already escalated");
                return false;
            }
            Err(e) => {
                tracing::warn!(%conflict_id, error = %e, "conflict vanished before escalation");
                return false;
            }
        }
        conflict.status = ConflictStatus::Escalated;

        tracing::warn!(%conflict_id, policy_id = %conflict.policy_id, reason, "escalating conflict");
        self.events
            .dispatch(&ConflictEvent::escalated(conflict_id, reason));

        match &self.escalator {
            Some(escalator) => {
                // Escalation is fire-and-forget: a panicking escalator is
                // logged and never unwinds into the caller.
                let escalator = Arc::clone(escalator);
                let reason = reason.to_string();
                if let Err(e) = run_bounded("arb-escalate", None, move || {
                    escalator.escalate(&conflict, &reason)
                }) {
                    tracing::error!(%conflict_id, error = %e, "escalator failed");
                }
            }
            None => {
                tracing::warn!(%conflict_id, "no escalator configured; conflict left escalated in registry");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ResolutionConfig;
    use crate::error::ResolutionError;
    use crate::resolution::{BlockActionStrategy, ResolutionPlan, ResolutionStrategy};
    use arb_policy::{Action, Severity};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingEscalator {
        seen: Mutex<Vec<(Uuid, String)>>,
    }

    impl CountingEscalator {
        fn count_for(&self, conflict_id: Uuid) -> usize {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| *id == conflict_id)
                .count()
        }

        fn total(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Escalator for CountingEscalator {
        fn escalate(&self, conflict: &Conflict, reason: &str) {
            assert_eq!(conflict.status, ConflictStatus::Escalated);
            self.seen
                .lock()
                .unwrap()
                .push((conflict.conflict_id, reason.to_string()));
        }
    }

    struct PanickingEscalator;

    impl Escalator for PanickingEscalator {
        fn escalate(&self, _conflict: &Conflict, _reason: &str) {
            panic!("pager offline");
        }
    }

    struct FailingApply;

    impl ResolutionStrategy for FailingApply {
        fn name(&self) -> &str {
            "failing_apply"
        }
        fn plan(&self, conflict: &Conflict) -> Result<ResolutionPlan, ResolutionError> {
            BlockActionStrategy.plan(conflict)
        }
        fn apply(&self, resolution: &Resolution) -> Result<(), ResolutionError> {
            Err(ResolutionError::ApplyFailed {
                resolution_id: resolution.resolution_id,
                reason: "enforcement point unreachable".to_string(),
            })
        }
    }

    struct Fixture {
        registry: Arc<ConflictRegistry>,
        escalator: Arc<CountingEscalator>,
        resolver: ConflictResolver,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConflictRegistry::new());
        let engine = Arc::new(ResolutionEngine::new(ResolutionConfig {
            apply_timeout_ms: 1_000,
        }));
        engine.register_strategy("blockable", Arc::new(BlockActionStrategy));
        engine.register_strategy("unenforceable", Arc::new(FailingApply));
        let escalator = Arc::new(CountingEscalator::default());
        let resolver = ConflictResolver::new(Arc::clone(&registry), engine)
            .with_escalator(escalator.clone());
        Fixture {
            registry,
            escalator,
            resolver,
        }
    }

    fn register(registry: &ConflictRegistry, policy_id: &str) -> Conflict {
        let c = Conflict::new(
            "A",
            Action::new("A", "write_data", "D1"),
            policy_id,
            "denied",
            Severity::Medium,
        );
        registry.put(c.clone()).unwrap();
        c
    }

    #[test]
    fn missing_strategy_escalates_once_and_keeps_conflict() {
        let f = fixture();
        let c = register(&f.registry, "no-strategy");

        let resolutions = f.resolver.resolve_conflicts(&[c.clone()]);

        assert!(resolutions.is_empty());
        let stored = f.registry.get(c.conflict_id).expect("conflict retained");
        assert_eq!(stored.status, ConflictStatus::Escalated);
        assert_eq!(f.escalator.count_for(c.conflict_id), 1);
        assert!(f.escalator.seen.lock().unwrap()[0]
            .1
            .contains("no resolution strategy"));
    }

    #[test]
    fn applied_resolution_removes_conflict_without_escalation() {
        let f = fixture();
        let c = register(&f.registry, "blockable");

        let resolutions = f.resolver.resolve_conflicts(&[c.clone()]);

        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].conflict_id, c.conflict_id);
        assert!(f.registry.get(c.conflict_id).is_none());
        assert_eq!(f.escalator.total(), 0);
    }

    #[test]
    fn failed_apply_escalates_and_keeps_conflict() {
        let f = fixture();
        let c = register(&f.registry, "unenforceable");

        let report = f.resolver.resolve_with_report(&[c.clone()]);

        assert!(report.resolved.is_empty());
        assert_eq!(report.applied.len(), 1);
        assert!(!report.applied[0].is_applied());
        assert_eq!(report.escalated.len(), 1);
        assert!(report.escalated[0].reason.contains("enforcement point unreachable"));
        assert!(f.registry.get(c.conflict_id).is_some());
        assert_eq!(f.escalator.count_for(c.conflict_id), 1);
    }

    #[test]
    fn mixed_batch_conserves_resolutions() {
        let f = fixture();
        let batch = vec![
            register(&f.registry, "blockable"),
            register(&f.registry, "no-strategy"),
            register(&f.registry, "unenforceable"),
            register(&f.registry, "blockable"),
        ];
        let input_ids: HashSet<Uuid> = batch.iter().map(|c| c.conflict_id).collect();

        let resolutions = f.resolver.resolve_conflicts(&batch);

        assert!(resolutions.len() <= batch.len());
        assert_eq!(resolutions.len(), 2);
        assert!(resolutions.iter().all(|r| input_ids.contains(&r.conflict_id)));
        assert_eq!(f.escalator.total(), 2);
        assert_eq!(f.registry.len(), 2);
        assert!(f.registry.list_open().is_empty());
    }

    #[test]
    fn duplicates_unknown_and_escalated_inputs_are_skipped() {
        let f = fixture();
        let c = register(&f.registry, "no-strategy");
        let ghost = Conflict::new(
            "A",
            Action::new("A", "write_data", "D1"),
            "blockable",
            "never registered",
            Severity::Low,
        );

        let report = f.resolver.resolve_with_report(&[c.clone(), c.clone(), ghost.clone()]);
        assert_eq!(report.escalated.len(), 1);
        assert_eq!(report.skipped, vec![c.conflict_id, ghost.conflict_id]);

        // A second pass over an escalated conflict must not escalate it again.
        let again = f.resolver.resolve_with_report(&[c.clone()]);
        assert!(again.escalated.is_empty());
        assert_eq!(again.skipped, vec![c.conflict_id]);
        assert_eq!(f.escalator.count_for(c.conflict_id), 1);
    }

    #[test]
    fn conflict_claimed_elsewhere_is_left_alone() {
        let f = fixture();
        let c = register(&f.registry, "unenforceable");
        assert!(f.registry.claim(c.conflict_id).is_some());

        let report = f.resolver.resolve_with_report(&[c.clone()]);
        assert!(report.applied.is_empty());
        assert!(report.escalated.is_empty());
        assert_eq!(report.skipped, vec![c.conflict_id]);
        assert_eq!(
            f.registry.get(c.conflict_id).unwrap().status,
            ConflictStatus::Resolving
        );

        // Once handed back, the next call owns it.
        assert!(f.registry.release(c.conflict_id));
        let report = f.resolver.resolve_with_report(&[c.clone()]);
        assert_eq!(report.escalated.len(), 1);
        assert_eq!(f.escalator.count_for(c.conflict_id), 1);
    }

    #[test]
    fn panicking_escalator_is_contained() {
        let registry = Arc::new(ConflictRegistry::new());
        let resolver = ConflictResolver::new(
            Arc::clone(&registry),
            Arc::new(ResolutionEngine::default()),
        )
        .with_escalator(Arc::new(PanickingEscalator));
        let c = register(&registry, "no-strategy");

        let report = resolver.resolve_with_report(&[c.clone()]);

        assert_eq!(report.escalated.len(), 1);
        assert_eq!(
            registry.get(c.conflict_id).unwrap().status,
            ConflictStatus::Escalated
        );
    }

    #[test]
    fn without_escalator_conflict_is_still_marked() {
        let registry = Arc::new(ConflictRegistry::new());
        let resolver = ConflictResolver::new(
            Arc::clone(&registry),
            Arc::new(ResolutionEngine::default()),
        );
        let c = register(&registry, "no-strategy");

        assert!(resolver.resolve_conflicts(&[c.clone()]).is_empty());
        assert_eq!(
            registry.get(c.conflict_id).unwrap().status,
            ConflictStatus::Escalated
        );
    }
}
