use std::path::PathBuf;

/// Heat vulnerability index pipeline
#[derive(clap::Parser, Debug)]
#[command(name = "openhvi", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Project root holding data_raw/, data_intermediate/ and data_out/
    #[arg(long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run one stage, or every stage in order
    Run(RunArgs),

    /// Resolve and print the raw input files
    Inputs,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Stage name or number (aoi, sensitivity, adaptive, exposure, composite)
    pub stage: Option<openhvi::Stage>,
}
