// replay.rs — `arb replay`: push a file of recorded actions through the
// pipeline with concurrent workers.
//
// Input is JSONL, one Action per line:
//   {"agent_id":"A","kind":"write_data","resource":"D1","attributes":{}}
// Blank lines and lines starting with '#' are skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use arb_conflict::Conflict;
use arb_policy::Action;
use arb_runtime::{Arbiter, ArbiterConfig};

#[derive(Args)]
pub struct ReplayArgs {
    /// JSONL file of actions.
    pub file: PathBuf,
    /// Number of concurrent workers.
    #[arg(long, default_value = "4")]
    pub workers: usize,
}

/// Totals across all workers.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub actions: usize,
    pub compliant: usize,
    pub conflicts: usize,
    pub resolved: usize,
    pub escalated: usize,
    /// Actions rejected as malformed.
    pub rejected: usize,
}

impl ReplaySummary {
    fn merge(&mut self, other: &ReplaySummary) {
        self.actions += other.actions;
        self.compliant += other.compliant;
        self.conflicts += other.conflicts;
        self.resolved += other.resolved;
        self.escalated += other.escalated;
        self.rejected += other.rejected;
    }
}

#[derive(Serialize)]
struct ReplayReport {
    summary: ReplaySummary,
    /// Conflicts still in the registry when the replay finished.
    unresolved: Vec<Conflict>,
}

pub fn execute(args: &ReplayArgs, config: ArbiterConfig) -> anyhow::Result<()> {
    let actions = read_actions(&args.file)?;
    let arbiter = Arbiter::new(config).context("building arbiter")?;

    let summary = replay(&arbiter, &actions, args.workers);
    tracing::info!(
        actions = summary.actions,
        conflicts = summary.conflicts,
        resolved = summary.resolved,
        escalated = summary.escalated,
        "replay finished"
    );

    let report = ReplayReport {
        summary,
        unresolved: arbiter.conflicts(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_actions(path: &Path) -> anyhow::Result<Vec<Action>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_actions(&content).with_context(|| format!("parsing {}", path.display()))
}

fn parse_actions(content: &str) -> anyhow::Result<Vec<Action>> {
    let mut actions = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let action: Action = serde_json::from_str(line)
            .with_context(|| format!("line {} is not a valid action", index + 1))?;
        actions.push(action);
    }
    Ok(actions)
}

/// Run every action once, spread over `workers` threads.
fn replay(arbiter: &Arbiter, actions: &[Action], workers: usize) -> ReplaySummary {
    let next = &AtomicUsize::new(0);
    let workers = workers.clamp(1, actions.len().max(1));

    let partials: Vec<ReplaySummary> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(move || {
                    let mut local = ReplaySummary::default();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(action) = actions.get(i) else { break };
                        record(&mut local, arbiter, action);
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let mut summary = ReplaySummary::default();
    for partial in &partials {
        summary.merge(partial);
    }
    summary
}

fn record(summary: &mut ReplaySummary, arbiter: &Arbiter, action: &Action) {
    summary.actions += 1;
    match arbiter.handle_action(&action.agent_id, action) {
        Ok(outcome) if outcome.is_compliant() => summary.compliant += 1,
        Ok(outcome) => {
            summary.conflicts += outcome.conflicts.len();
            summary.resolved += outcome.resolutions.len();
            summary.escalated += outcome.escalated.len();
        }
        Err(e) => {
            tracing::warn!(agent_id = %action.agent_id, error = %e, "action rejected");
            summary.rejected += 1;
        }
    }
}
