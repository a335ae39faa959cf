pub mod config;
pub mod inputs;
pub mod run;

use anyhow::Result;
use openhvi::Config;

use crate::cli::Cli;

/// Config file if given, else defaults; `--root` overrides the file's root.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };
    if let Some(root) = &cli.root {
        config.paths.root = root.clone();
    }
    tracing::debug!(root = %config.paths.root.display(), "loaded configuration");
    Ok(config)
}
