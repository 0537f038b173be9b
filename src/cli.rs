// src/cli.rs
//! CLI definitions for the image synchronizer
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imagesync")]
#[command(version)]
#[command(about = "Mirror signed simplestreams image catalogs into a cloud image service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the synchronizer
    Sync {
        /// Path to the YAML configuration (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Print the default configuration as YAML
    GenerateConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync() {
        let cli = Cli::parse_from(["imagesync", "sync", "-c", "/etc/imagesync.yaml", "--once"]);
        match cli.command {
            Commands::Sync { config, once } => {
                assert_eq!(config, Some(PathBuf::from("/etc/imagesync.yaml")));
                assert!(once);
            }
            Commands::GenerateConfig => panic!("expected sync"),
        }
    }
}
