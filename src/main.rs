// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { config, once } => commands::cmd_sync(config.as_deref(), once),
        Commands::GenerateConfig => commands::cmd_generate_config(),
    }
}
