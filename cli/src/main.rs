mod cli;
mod commands;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{config, inputs, run};

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("openhvi={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = commands::load_config(&cli)?;
    match &cli.command {
        Commands::Run(args) => run::run(&config, args),
        Commands::Inputs => inputs::run(&config),
        Commands::Config => config::run(&config),
    }
}

fn main() -> Result<()> { run() }
