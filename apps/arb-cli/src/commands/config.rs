// config.rs — `arb config`: print the effective configuration.

use arb_runtime::ArbiterConfig;

pub fn execute(config: &ArbiterConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
