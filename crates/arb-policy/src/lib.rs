//! # arb-policy
//!
//! Policy evaluation for Conflict Arbiter.
//!
//! Agents propose [`Action`]s. Every registered [`Policy`] judges the action
//! and returns an [`EvaluationResult`]. The [`PolicyStore`] owns the active
//! policies and evaluates an action against all of them in priority order.
//!
//! ## Key invariants
//!
//! - **Fail closed**: a policy that errors, panics, or overruns its timeout is
//!   reported as non-compliant with a synthetic message.
//! - **One broken policy never blocks the rest**: every registered policy gets
//!   exactly one result per evaluation.
//! - **Priority order**: results come back highest priority first, ties in
//!   registration order, whether or not evaluation ran in parallel.

pub mod action;
pub mod bounded;
pub mod capability;
pub mod error;
pub mod policy;
pub mod store;

pub use action::Action;
pub use bounded::run_bounded;
pub use capability::{CapabilityGrant, CapabilityPolicy};
pub use error::{BoundedError, PolicyError};
pub use policy::{EvaluationResult, Policy, PredicatePolicy, Severity};
pub use store::{EvaluationConfig, PolicyEvaluation, PolicyStore};
