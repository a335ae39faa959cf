use anyhow::{Context, Result};
use openhvi::Config;

pub fn run(config: &Config) -> Result<()> {
    let text = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    print!("{text}");
    Ok(())
}
