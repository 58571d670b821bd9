//! # arb-conflict
//!
//! Conflict detection, bookkeeping and automated resolution for Conflict Arbiter.
//!
//! A [`Conflict`] records one policy violation by one agent action. The
//! [`ConflictDetector`] turns non-compliant evaluations into conflicts and
//! stores them in the [`ConflictRegistry`]. The [`ConflictResolver`] asks the
//! [`ResolutionEngine`] for remediation, applies it, and hands anything it
//! cannot fix to an [`Escalator`].
//!
//! ## Key components
//!
//! - [`ConflictRegistry`] — thread-safe set of open and escalated conflicts
//! - [`ConflictDetector`] — detect(agent, action) → recorded conflicts
//! - [`ResolutionEngine`] — per-policy [`ResolutionStrategy`] lookup, bounded
//!   plan and apply
//! - [`ConflictResolver`] — resolve, remove on success, escalate otherwise
//! - [`ConflictEvent`] / [`EventDispatcher`] — lifecycle events for sinks

pub mod conflict;
pub mod detector;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod resolution;
pub mod resolver;

pub use conflict::{Conflict, ConflictStatus};
pub use detector::ConflictDetector;
pub use engine::{
    ApplyOutcome, ApplyStatus, GenerationOutcome, ResolutionConfig, ResolutionEngine,
    UnresolvedConflict,
};
pub use error::{ConflictError, ResolutionError};
pub use events::{ConflictEvent, EventDispatcher, EventSink, JsonlEventSink};
pub use registry::ConflictRegistry;
pub use resolution::{
    BlockActionStrategy, RemediationAction, Resolution, ResolutionPlan, ResolutionRecord,
    ResolutionStrategy,
};
pub use resolver::{ConflictResolver, EscalatedConflict, Escalator, ResolveReport};
