//! # arb-runtime
//!
//! Configuration and the end-to-end pipeline for Conflict Arbiter.
//!
//! [`ArbiterConfig`] is read once (TOML file plus `ARBITER_*` overrides) and
//! handed to [`Arbiter::new`], which wires the policy store, conflict
//! registry, resolution engine and escalation manager together. Embedders
//! call [`Arbiter::handle_action`] for every inbound agent action.

pub mod arbiter;
pub mod config;
pub mod error;

pub use arbiter::{ActionOutcome, Arbiter};
pub use config::{ArbiterConfig, BlockStrategyConfig};
pub use error::{ArbiterError, ConfigError};
