//! # arb-escalation
//!
//! Hands conflicts that automated resolution could not fix to people.
//!
//! The [`EscalationManager`] packages a conflict as an [`EscalationPayload`]
//! and sends it through one configured [`EscalationChannel`]. It implements
//! [`arb_conflict::Escalator`], so it plugs straight into the resolver.
//!
//! Escalation is fire-and-forget: missing recipients, unknown channels,
//! failing or stalled channels are logged and never surface to the caller.

pub mod channel;
pub mod error;
pub mod manager;
pub mod payload;

pub use channel::{EscalationChannel, JsonlChannel, LogChannel};
pub use error::EscalationError;
pub use manager::{Delivery, EscalationConfig, EscalationManager, JSONL_CHANNEL, LOG_CHANNEL};
pub use payload::EscalationPayload;
