// pipeline.rs — End-to-end tests for the conflict pipeline.
//
// Flow under test:
//   1. Load arbiter.toml (capability policies, channels, event log)
//   2. handle_action → detect → resolve → escalate
//   3. Inspect the registry, the event log and the escalation channel

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use arb_conflict::{
    BlockActionStrategy, Conflict, ConflictRegistry, ConflictResolver, ConflictStatus,
    Escalator, Resolution, ResolutionConfig, ResolutionEngine, ResolutionError,
    ResolutionPlan, ResolutionStrategy,
};
use arb_escalation::{EscalationChannel, EscalationError, EscalationPayload};
use arb_policy::{Action, EvaluationResult, PredicatePolicy, Severity};
use arb_runtime::{Arbiter, ArbiterConfig};
use tempfile::TempDir;

const WRITE_POLICY: &str = "no-write-without-write-access";

fn write_config(dir: &TempDir, escalation: &str) -> ArbiterConfig {
    let events = dir.path().join("events.jsonl");
    let escalations = dir.path().join("escalations.jsonl");
    let content = format!(
        r#"
events_log = "{events}"

[evaluation]
timeout_ms = 500

[escalation]
{escalation}
jsonl_path = "{escalations}"

[[capability_policies]]
policy_id = "{WRITE_POLICY}"
name = "No write without write access"
priority = 10
governs = ["write_*"]

[[capability_policies.grants]]
agent_id = "B"
kind = "write_*"
"#,
        events = events.display(),
        escalations = escalations.display(),
    );
    let path = dir.path().join("arbiter.toml");
    fs::write(&path, content).unwrap();
    ArbiterConfig::load_file(&path).unwrap()
}

fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[derive(Default)]
struct RecordingChannel {
    payloads: Mutex<Vec<EscalationPayload>>,
}

impl EscalationChannel for RecordingChannel {
    fn send(
        &self,
        _recipients: &[String],
        payload: &EscalationPayload,
    ) -> Result<(), EscalationError> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct UnreachableEnforcer;

impl ResolutionStrategy for UnreachableEnforcer {
    fn name(&self) -> &str {
        "unreachable_enforcer"
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

#[test]
fn unresolved_write_is_escalated_then_resolved_once_a_strategy_exists() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"channel = "jsonl"
recipients = ["ops@example.com"]"#,
    );
    let arbiter = Arbiter::new(config).unwrap();

    // No strategy yet: the conflict is kept and escalated.
    let outcome = arbiter
        .handle_action("A", &Action::new("A", "write_data", "D1"))
        .unwrap();
    assert_eq!(outcome.conflicts.len(), 1);
    let first = &outcome.conflicts[0];
    assert_eq!(first.policy_id, WRITE_POLICY);
    assert_eq!(first.related_agent_id, "A");
    assert_eq!(first.severity, Severity::Medium);
    assert!(outcome.resolutions.is_empty());
    assert_eq!(
        arbiter.conflict(first.conflict_id).unwrap().status,
        ConflictStatus::Escalated
    );

    let escalations = read_lines(&dir.path().join("escalations.jsonl"));
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0]["conflict_id"], first.conflict_id.to_string());
    assert_eq!(escalations[0]["recipients"][0], "ops@example.com");
    assert!(escalations[0]["reason"]
        .as_str()
        .unwrap()
        .contains("no resolution strategy"));

    // Agent B holds the grant.
    let compliant = arbiter
        .handle_action("B", &Action::new("B", "write_data", "D1"))
        .unwrap();
    assert!(compliant.is_compliant());

    // With a strategy in place the next violation is resolved and removed.
    arbiter.register_strategy(WRITE_POLICY, Arc::new(BlockActionStrategy));
    let outcome = arbiter
        .handle_action("A", &Action::new("A", "write_data", "D2"))
        .unwrap();
    assert_eq!(outcome.resolutions.len(), 1);
    assert!(outcome.escalated.is_empty());
    let second = outcome.conflicts[0].conflict_id;
    assert!(arbiter.conflict(second).is_none());

    // The escalated conflict stays escalated; it is never re-resolved.
    assert!(arbiter.resolve_open().is_empty());
    assert_eq!(arbiter.conflicts().len(), 1);
    assert_eq!(read_lines(&dir.path().join("escalations.jsonl")).len(), 1);

    let events: Vec<String> = read_lines(&dir.path().join("events.jsonl"))
        .iter()
        .map(|e| e["event_type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        events,
        vec![
            "conflict_detected",
            "conflict_escalated",
            "conflict_detected",
            "conflict_resolved",
        ]
    );
}

#[test]
fn failed_apply_reaches_a_custom_channel() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"channel = "pager"
recipients = ["oncall"]"#,
    );
    let arbiter = Arbiter::new(config).unwrap();
    let pager = Arc::new(RecordingChannel::default());
    arbiter.register_escalation_channel("pager", pager.clone());
    arbiter.register_strategy(WRITE_POLICY, Arc::new(UnreachableEnforcer));

    let outcome = arbiter
        .handle_action("A", &Action::new("A", "write_data", "D1"))
        .unwrap();

    assert!(outcome.resolutions.is_empty());
    assert_eq!(outcome.escalated.len(), 1);
    let payloads = pager.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].conflict_id, outcome.conflicts[0].conflict_id);
    assert!(payloads[0]
        .reason
        .as_deref()
        .unwrap()
        .contains("enforcement point unreachable"));
}

#[test]
fn hung_policy_fails_closed_without_stalling_the_caller() {
    let dir = TempDir::new().unwrap();
    let mut config = write_config(&dir, r#"channel = "log""#);
    config.evaluation.timeout_ms = 50;
    let arbiter = Arbiter::new(config).unwrap();
    arbiter
        .register_policy(Arc::new(PredicatePolicy::new("slow-oracle", 1, |_| {
            thread::sleep(Duration::from_secs(2));
            Ok(EvaluationResult::compliant())
        })))
        .unwrap();

    let started = std::time::Instant::now();
    let outcome = arbiter
        .handle_action("B", &Action::new("B", "read_data", "D1"))
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].policy_id, "slow-oracle");
    assert!(outcome.conflicts[0].violation_details.contains("timed out"));
}

#[test]
fn concurrent_callers_record_every_conflict_once() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, r#"channel = "log""#);
    let arbiter = Arbiter::new(config).unwrap();
    arbiter.register_strategy(WRITE_POLICY, Arc::new(BlockActionStrategy));

    let (threads, per_thread) = (8, 40);
    let resolved = AtomicUsize::new(0);
    let agent = "A";

    thread::scope(|s| {
        for t in 0..threads {
            let arbiter = &arbiter;
            let resolved = &resolved;
            s.spawn(move || {
                for i in 0..per_thread {
                    let resource = format!("D{}-{}", t, i);
                    let outcome = arbiter
                        .handle_action(
                            agent,
                            &Action::new(agent, "write_data", resource),
                        )
                        .unwrap();
                    assert_eq!(outcome.conflicts.len(), 1);
                    resolved.fetch_add(outcome.resolutions.len(), Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(resolved.load(Ordering::SeqCst), threads * per_thread);
    assert!(arbiter.conflicts().is_empty());

    let detected: Vec<_> = read_lines(&dir.path().join("events.jsonl"))
        .into_iter()
        .filter(|e| e["event_type"] == "conflict_detected")
        .map(|e| e["conflict_id"].as_str().unwrap().to_string())
        .collect();
    let unique: HashSet<_> = detected.iter().collect();
    assert_eq!(detected.len(), threads * per_thread);
    assert_eq!(unique.len(), detected.len());
}

#[derive(Default)]
struct CountingEscalator {
    calls: AtomicUsize,
}

impl Escalator for CountingEscalator {
    fn escalate(&self, _conflict: &Conflict, _reason: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn racing_resolvers_escalate_a_conflict_exactly_once() {
    let registry = Arc::new(ConflictRegistry::new());
    let escalator = Arc::new(CountingEscalator::default());
    let resolver = ConflictResolver::new(
        Arc::clone(&registry),
        Arc::new(ResolutionEngine::default()),
    )
    .with_escalator(escalator.clone());

    let conflict = Conflict::new(
        "A",
        Action::new("A", "write_data", "D1"),
        WRITE_POLICY,
        "denied",
        Severity::High,
    );
    registry.put(conflict.clone()).unwrap();

    thread::scope(|s| {
        for _ in 0..8 {
            let resolver = &resolver;
            let conflict = conflict.clone();
            s.spawn(move || {
                assert!(resolver.resolve_conflicts(&[conflict]).is_empty());
            });
        }
    });

    assert_eq!(escalator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        registry.get(conflict.conflict_id).unwrap().status,
        ConflictStatus::Escalated
    );
}

/// Applies slowly. With `flaky_retries`, every apply after the first fails.
struct SlowEnforcer {
    applies: AtomicUsize,
    flaky_retries: bool,
}

impl ResolutionStrategy for SlowEnforcer {
    fn name(&self) -> &str {
        "slow_enforcer"
    }

    fn plan(&self, conflict: &Conflict) -> Result<ResolutionPlan, ResolutionError> {
        BlockActionStrategy.plan(conflict)
    }

    fn apply(&self, resolution: &Resolution) -> Result<(), ResolutionError> {
        let attempt = self.applies.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        if self.flaky_retries && attempt > 0 {
            return Err(ResolutionError::ApplyFailed {
                resolution_id: resolution.resolution_id,
                reason: "enforcement point rejected a repeat".to_string(),
            });
        }
        Ok(())
    }
}

#[test]
fn overlapping_resolvers_apply_a_resolution_exactly_once() {
    for flaky_retries in [false, true] {
        let registry = Arc::new(ConflictRegistry::new());
        let engine = Arc::new(ResolutionEngine::new(ResolutionConfig {
            apply_timeout_ms: 2_000,
        }));
        let enforcer = Arc::new(SlowEnforcer {
            applies: AtomicUsize::new(0),
            flaky_retries,
        });
        engine.register_strategy(WRITE_POLICY, enforcer.clone());
        let escalator = Arc::new(CountingEscalator::default());
        let resolver = ConflictResolver::new(Arc::clone(&registry), engine)
            .with_escalator(escalator.clone());

        let conflict = Conflict::new(
            "A",
            Action::new("A", "write_data", "D1"),
            WRITE_POLICY,
            "denied",
            Severity::High,
        );
        registry.put(conflict.clone()).unwrap();

        let resolved = AtomicUsize::new(0);
        thread::scope(|s| {
            for delay_ms in [0, 100] {
                let resolver = &resolver;
                let resolved = &resolved;
                let conflict = conflict.clone();
                s.spawn(move || {
                    thread::sleep(Duration::from_millis(delay_ms));
                    let report = resolver.resolve_with_report(&[conflict]);
                    resolved.fetch_add(report.resolved.len(), Ordering::SeqCst);
                });
            }
        });

        assert_eq!(resolved.load(Ordering::SeqCst), 1);
        assert_eq!(enforcer.applies.load(Ordering::SeqCst), 1);
        assert_eq!(escalator.calls.load(Ordering::SeqCst), 0);
        assert!(registry.get(conflict.conflict_id).is_none());
    }
}
