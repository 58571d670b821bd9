// config.rs — Arbiter configuration.
//
// ArbiterConfig groups the per-component settings and is built once, then
// passed into constructors. Sources, later ones winning:
//   1. Built-in defaults
//   2. TOML file (a missing file is not an error)
//   3. ARBITER_* environment variables

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use arb_conflict::ResolutionConfig;
use arb_escalation::EscalationConfig;
use arb_policy::{CapabilityPolicy, EvaluationConfig};

use crate::error::ConfigError;

pub const ENV_ESCALATION_CHANNEL: &str = "ARBITER_ESCALATION_CHANNEL";
pub const ENV_ESCALATION_RECIPIENTS: &str = "ARBITER_ESCALATION_RECIPIENTS";
pub const ENV_EVALUATION_TIMEOUT_MS: &str = "ARBITER_EVALUATION_TIMEOUT_MS";
pub const ENV_APPLY_TIMEOUT_MS: &str = "ARBITER_APPLY_TIMEOUT_MS";

/// Top-level configuration, usually read from `arbiter.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Optional JSONL file receiving conflict lifecycle events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_log: Option<PathBuf>,

    pub evaluation: EvaluationConfig,

    pub resolution: ResolutionConfig,

    pub escalation: EscalationConfig,

    /// Declarative capability policies registered at startup.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capability_policies: Vec<CapabilityPolicy>,

    /// Policies whose conflicts are remediated by blocking the action.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub block_strategies: Vec<BlockStrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStrategyConfig {
    pub policy_id: String,
}

impl ArbiterConfig {
    /// Load from `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Load from `path` only. Returns defaults when the file does not exist.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Apply ARBITER_* overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(channel) = lookup(ENV_ESCALATION_CHANNEL) {
            self.escalation.channel = channel.trim().to_string();
        }
        if let Some(recipients) = lookup(ENV_ESCALATION_RECIPIENTS) {
            self.escalation.recipients = recipients
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = lookup(ENV_EVALUATION_TIMEOUT_MS) {
            self.evaluation.timeout_ms = parse_ms(ENV_EVALUATION_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_APPLY_TIMEOUT_MS) {
            self.resolution.apply_timeout_ms = parse_ms(ENV_APPLY_TIMEOUT_MS, &ms)?;
        }
        Ok(())
    }

    /// Render as TOML (what `arb config` prints).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_ms(var: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::Env {
        var: var.to_string(),
        reason: format!("'{}' is not a number of milliseconds: {}", value, e),
    })
}
