// manager.rs — EscalationManager: hands unresolved conflicts to a channel.
//
// escalate_conflict(conflict):
//   1. No recipients configured → warn, do nothing.
//   2. Look up the configured channel; unknown → error log, return.
//   3. Build the payload and send it on a worker thread, bounded by
//      `dispatch_timeout_ms`.
//
// Every failure is logged and swallowed. The conflict's stored state is owned
// by the registry and is never touched here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use arb_conflict::{Conflict, Escalator};
use arb_policy::run_bounded;

use crate::channel::{EscalationChannel, JsonlChannel, LogChannel};
use crate::error::EscalationError;
use crate::payload::EscalationPayload;

/// Name of the always-available tracing channel.
pub const LOG_CHANNEL: &str = "log";
/// Name of the JSONL channel, registered when `jsonl_path` is set.
pub const JSONL_CHANNEL: &str = "jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Channel used for every escalation.
    pub channel: String,
    /// Passed through to the channel; their format is the channel's business.
    pub recipients: Vec<String>,
    /// Upper bound for one dispatch. 0 disables the bound.
    pub dispatch_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonl_path: Option<PathBuf>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            channel: LOG_CHANNEL.to_string(),
            recipients: Vec::new(),
            dispatch_timeout_ms: 5_000,
            jsonl_path: None,
        }
    }
}

impl EscalationConfig {
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.dispatch_timeout_ms > 0).then(|| Duration::from_millis(self.dispatch_timeout_ms))
    }
}

/// What a dispatch attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { channel: String },
    /// Nobody to notify; nothing was sent.
    NoRecipients,
}

pub struct EscalationManager {
    config: EscalationConfig,
    channels: RwLock<HashMap<String, Arc<dyn EscalationChannel>>>,
}

impl EscalationManager {
    pub fn new(config: EscalationConfig) -> Self {
        let mut channels: HashMap<String, Arc<dyn EscalationChannel>> = HashMap::new();
        channels.insert(LOG_CHANNEL.to_string(), Arc::new(LogChannel));
        if let Some(path) = &config.jsonl_path {
            channels.insert(JSONL_CHANNEL.to_string(), Arc::new(JsonlChannel::new(path)));
        }
        tracing::debug!(channel = %config.channel, recipients = config.recipients.len(), "escalation manager ready");
        Self {
            config,
            channels: RwLock::new(channels),
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Register (or replace) a channel under `name`.
    pub fn register_channel(
        &self,
        name: impl Into<String>,
        channel: Arc<dyn EscalationChannel>,
    ) -> Option<Arc<dyn EscalationChannel>> {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), channel)
    }

    /// Registered channel names, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Escalate a conflict. Never fails and never panics.
    pub fn escalate_conflict(&self, conflict: &Conflict) {
        self.notify(EscalationPayload::from_conflict(conflict));
    }

    /// Send a payload through the configured channel, reporting what happened.
    pub fn dispatch(&self, payload: &EscalationPayload) -> Result<Delivery, EscalationError> {
        if self.config.recipients.is_empty() {
            return Ok(Delivery::NoRecipients);
        }

        let name = self.config.channel.clone();
        let channel = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .ok_or_else(|| EscalationError::UnknownChannel {
                channel: name.clone(),
            })?;

        let recipients = self.config.recipients.clone();
        let owned = payload.clone();
        let thread_name = format!("arb-escalate-{}", name);
        run_bounded(&thread_name, self.config.dispatch_timeout(), move || {
            channel.send(&recipients, &owned)
        })
        .map_err(|source| EscalationError::Dispatch {
            channel: name.clone(),
            source,
        })??;

        Ok(Delivery::Sent { channel: name })
    }

    fn notify(&self, payload: EscalationPayload) {
        let conflict_id = payload.conflict_id;
        match self.dispatch(&payload) {
            Ok(Delivery::Sent { channel }) => {
                tracing::info!(%conflict_id, channel = %channel, "conflict escalated");
            }
            Ok(Delivery::NoRecipients) => {
                tracing::warn!(%conflict_id, "no escalation recipients configured");
            }
            Err(e @ EscalationError::UnknownChannel { .. }) => {
                tracing::error!(%conflict_id, error = %e, "unsupported escalation channel");
            }
            Err(e) => {
                tracing::error!(%conflict_id, error = %e, "escalation dispatch failed");
            }
        }
    }
}

impl Default for EscalationManager {
    fn default() -> Self {
        Self::new(EscalationConfig::default())
    }
}

impl Escalator for EscalationManager {
    fn escalate(&self, conflict: &Conflict, reason: &str) {
        self.notify(EscalationPayload::from_conflict(conflict).with_reason(reason));
    }
}
