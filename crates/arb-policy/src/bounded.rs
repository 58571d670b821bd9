// bounded.rs — Deadline-bounded execution of caller-supplied work.
//
// Policy evaluation, remediation and escalation dispatch all call into code the
// core does not own. Each such call runs off the caller's thread and the
// caller waits for at most its budget. Work that overruns is abandoned: it
// finishes in the background and its result is dropped.
//
// Work is handed to a small process-wide pool of long-lived workers. When
// every pool worker is busy (or stuck in abandoned work) the job gets a
// dedicated thread instead, so a hung policy can delay nothing but itself.
//
// Panics are caught on the worker and surfaced as `BoundedError::Panicked`, so
// a misbehaving policy or strategy never unwinds through the pipeline.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendError, Sender};

use crate::error::BoundedError;

type Outcome<T> = Result<T, BoundedError>;
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abandoned work still running somewhere.
static OVERRUNNING: AtomicUsize = AtomicUsize::new(0);

static POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Number of timed-out jobs that have not finished yet. Approximate: a job
/// finishing right at its deadline may stay counted.
pub fn overrunning() -> usize {
    OVERRUNNING.load(Ordering::SeqCst)
}

struct WorkerPool {
    tx: Sender<Job>,
    idle: Arc<AtomicUsize>,
}

impl WorkerPool {
    fn start(workers: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let idle = Arc::new(AtomicUsize::new(0));

        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let ready = Arc::clone(&idle);
            let spawned = thread::Builder::new()
                .name(format!("arb-worker-{}", idx))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                        ready.fetch_add(1, Ordering::SeqCst);
                    }
                });
            match spawned {
                Ok(_) => {
                    idle.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => tracing::warn!(error = %e, "could not start pool worker"),
            }
        }

        Self { tx, idle }
    }

    /// Hand `job` to an idle worker, or give it back when none is free.
    fn try_submit(&self, job: Job) -> Result<(), Job> {
        let claimed = self
            .idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !claimed {
            return Err(job);
        }
        self.tx.send(job).map_err(|SendError(job)| {
            self.idle.fetch_add(1, Ordering::SeqCst);
            job
        })
    }
}

fn pool() -> &'static WorkerPool {
    POOL.get_or_init(|| {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(2);
        WorkerPool::start(workers)
    })
}

/// Thread names must not contain NUL; strip every control character.
fn thread_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_control()).collect()
}

/// Work that has been handed to a worker (or failed to start).
pub struct Pending<T> {
    state: PendingState<T>,
}

enum PendingState<T> {
    Done(Outcome<T>),
    Running(Receiver<Outcome<T>>),
}

/// Start `work` off the calling thread. `name` labels a dedicated thread when
/// the pool is saturated.
pub fn spawn<T, F>(name: &str, work: F) -> Pending<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_on(pool(), name, work)
}

fn spawn_on<T, F>(pool: &WorkerPool, name: &str, work: F) -> Pending<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    // Capacity 1: the worker never blocks on send even if nobody waits anymore.
    let (tx, rx) = bounded::<Outcome<T>>(1);
    let job: Job = Box::new(move || {
        if tx.send(catch(work)).is_err() {
            // The waiter gave up on this job earlier.
            let _ = OVERRUNNING.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            });
        }
    });

    let job = match pool.try_submit(job) {
        Ok(()) => {
            return Pending {
                state: PendingState::Running(rx),
            }
        }
        Err(job) => job,
    };

    let state = match thread::Builder::new().name(thread_name(name)).spawn(job) {
        Ok(_) => PendingState::Running(rx),
        Err(e) => PendingState::Done(Err(BoundedError::Spawn(e.to_string()))),
    };
    Pending { state }
}

impl<T> Pending<T> {
    /// Wait for the result with no deadline.
    pub fn wait(self) -> Outcome<T> {
        match self.state {
            PendingState::Done(outcome) => outcome,
            PendingState::Running(rx) => rx.recv().unwrap_or_else(|_| Err(worker_vanished())),
        }
    }

    /// Wait until `deadline`. `budget` is only used to describe a timeout.
    pub fn wait_until(self, deadline: Instant, budget: Duration) -> Outcome<T> {
        match self.state {
            PendingState::Done(outcome) => outcome,
            PendingState::Running(rx) => match rx.recv_deadline(deadline) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    let overrunning = OVERRUNNING.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(
                        budget_ms = budget.as_millis() as u64,
                        overrunning,
                        "bounded work abandoned after timeout"
                    );
                    Err(BoundedError::TimedOut(budget))
                }
                Err(RecvTimeoutError::Disconnected) => Err(worker_vanished()),
            },
        }
    }
}

/// Run `work`, waiting at most `timeout`.
///
/// With no timeout the work runs inline on the calling thread (panics are
/// still caught), so unbounded deployments pay no thread cost.
pub fn run_bounded<T, F>(name: &str, timeout: Option<Duration>, work: F) -> Outcome<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match timeout {
        None => catch(work),
        Some(budget) => spawn(name, work).wait_until(Instant::now() + budget, budget),
    }
}

fn catch<T, F: FnOnce() -> T>(work: F) -> Outcome<T> {
    panic::catch_unwind(AssertUnwindSafe(work))
        .map_err(|payload| BoundedError::Panicked(panic_message(payload.as_ref())))
}

fn worker_vanished() -> BoundedError {
    BoundedError::Panicked("worker exited without reporting a result".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_run_returns_value() {
        assert_eq!(run_bounded("t", None, || 21 * 2), Ok(42));
    }

    #[test]
    fn bounded_run_returns_value_within_budget() {
        let out = run_bounded("t", Some(Duration::from_secs(5)), || "done");
        assert_eq!(out, Ok("done"));
    }

    #[test]
    fn overrunning_work_times_out() {
        let budget = Duration::from_millis(20);
        let out = run_bounded("slow", Some(budget), || {
            thread::sleep(Duration::from_millis(500));
            1
        });
        assert_eq!(out, Err(BoundedError::TimedOut(budget)));
    }

    #[test]
    fn panics_are_caught_inline_and_on_workers() {
        match run_bounded::<(), _>("p", None, || panic!("boom")) {
            Err(BoundedError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Panicked, got {:?}", other),
        }
        match run_bounded::<(), _>("p", Some(Duration::from_secs(5)), || {
            panic!("worker {}", 7)
        }) {
            Err(BoundedError::Panicked(msg)) => assert_eq!(msg, "worker 7"),
            other => panic!("expected Panicked, got {:?}", other),
        }
    }

    #[test]
    fn names_with_nul_do_not_panic_the_caller() {
        assert_eq!(thread_name("arb-policy-bad\0id\n"), "arb-policy-badid");

        // No pool workers: every job needs a dedicated, named thread.
        let empty = WorkerPool::start(0);
        let named = spawn_on(&empty, "arb-policy-bad\0id", || {
            thread::current().name().map(str::to_string)
        });
        assert_eq!(named.wait(), Ok(Some("arb-policy-badid".to_string())));
    }

    #[test]
    fn abandoned_work_is_counted() {
        let out = run_bounded("stuck", Some(Duration::from_millis(10)), || {
            thread::sleep(Duration::from_millis(100));
        });
        assert!(matches!(out, Err(BoundedError::TimedOut(_))));
        assert!(overrunning() >= 1);
    }

    #[test]
    fn busy_pool_falls_back_and_workers_are_reused() {
        let pool = WorkerPool::start(1);
        let (release, gate) = bounded::<()>(0);

        let held = spawn_on(&pool, "held", move || {
            let _ = gate.recv();
            thread::current().name().map(str::to_string)
        });
        let overflow = spawn_on(&pool, "overflow", || {
            thread::current().name().map(str::to_string)
        });
        assert_eq!(overflow.wait(), Ok(Some("overflow".to_string())));

        release.send(()).unwrap();
        assert_eq!(held.wait(), Ok(Some("arb-worker-0".to_string())));

        // The worker marks itself idle right after reporting.
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.idle.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let again = spawn_on(&pool, "again", || thread::current().name().map(str::to_string));
        assert_eq!(again.wait(), Ok(Some("arb-worker-0".to_string())));
    }

    #[test]
    fn spawned_work_can_be_collected_later() {
        let pending: Vec<_> = (0..4).map(|i| spawn("fan-out", move || i * 10)).collect();
        let results: Vec<_> = pending.into_iter().map(|p| p.wait().unwrap()).collect();
        assert_eq!(results, vec![0, 10, 20, 30]);
    }
}
