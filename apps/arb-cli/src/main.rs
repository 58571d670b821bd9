//! # arb-cli
//!
//! Command-line interface for Conflict Arbiter.
//!
//! - `arb check` — run one agent action through the pipeline
//! - `arb replay` — run a JSONL file of actions concurrently
//! - `arb config` — print the effective configuration

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arb_runtime::ArbiterConfig;

/// Conflict Arbiter CLI — detect, resolve and escalate agent policy conflicts.
#[derive(Parser)]
#[command(name = "arb", version, about)]
struct Cli {
    /// Configuration file (missing file = built-in defaults).
    #[arg(long, global = true, default_value = "arbiter.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines instead of text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a single action and print the outcome as JSON.
    Check(commands::check::CheckArgs),
    /// Replay a JSONL file of actions with concurrent workers.
    Replay(commands::replay::ReplayArgs),
    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = ArbiterConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match &cli.command {
        Commands::Check(args) => commands::check::execute(args, config),
        Commands::Replay(args) => commands::replay::execute(args, config),
        Commands::Config => commands::config::execute(&config),
    }
}

/// Logs go to stderr so JSON results on stdout stay machine-readable.
fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("arb_runtime=info".parse()?)
        .add_directive("arb_conflict=info".parse()?)
        .add_directive("arb_escalation=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    }
    Ok(())
}
