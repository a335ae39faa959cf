use anyhow::Result;
use openhvi::{run_all, run_stage, Config};

use crate::cli::RunArgs;

pub fn run(config: &Config, args: &RunArgs) -> Result<()> {
    match args.stage {
        Some(stage) => run_stage(stage, config),
        None => run_all(config),
    }
}
