// check.rs — `arb check`: run one action through the pipeline.

use anyhow::Context;
use clap::Args;
use serde_json::Value;

use arb_policy::Action;
use arb_runtime::{Arbiter, ArbiterConfig};

#[derive(Args)]
pub struct CheckArgs {
    /// Agent submitting the action.
    #[arg(long)]
    pub agent: String,
    /// Action kind (e.g., "write_data").
    #[arg(long)]
    pub kind: String,
    /// Target resource.
    #[arg(long, default_value = "")]
    pub resource: String,
    /// Extra attribute as KEY=VALUE; VALUE is parsed as JSON when possible.
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    pub attrs: Vec<String>,
}

pub fn execute(args: &CheckArgs, config: ArbiterConfig) -> anyhow::Result<()> {
    let mut action = Action::new(&args.agent, &args.kind, &args.resource);
    for attr in &args.attrs {
        let (key, value) = parse_attr(attr)?;
        action = action.with_attribute(key, value);
    }

    let arbiter = Arbiter::new(config).context("building arbiter")?;
    let outcome = arbiter.handle_action(&args.agent, &action)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_compliant() {
        tracing::info!(
            conflicts = outcome.conflicts.len(),
            resolved = outcome.resolutions.len(),
            escalated = outcome.escalated.len(),
            "action conflicts with policy"
        );
    }
    Ok(())
}

/// Split `KEY=VALUE`. `n=3` yields a number, `tag=prod` a string.
fn parse_attr(raw: &str) -> anyhow::Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("attribute '{}' is not KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("attribute '{}' has an empty key", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
