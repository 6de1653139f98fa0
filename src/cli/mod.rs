//! Command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "zeptocord")]
#[command(version)]
#[command(about = "Discord gateway for streaming tool-calling language models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and answer mentions (default)
    Run {
        /// Config file (defaults to ~/.zeptocord/config.json)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and environment
    Check {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        None => run::cmd_run(None).await,
        Some(Commands::Run { config }) => run::cmd_run(config).await,
        Some(Commands::Config { action }) => config::cmd_config(action).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["zeptocord"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_config_check_path() {
        let cli = Cli::try_parse_from(["zeptocord", "config", "check", "--config", "/tmp/c.json"])
            .unwrap();
        match cli.command {
            Some(Commands::Config {
                action: ConfigAction::Check { config },
            }) => assert_eq!(config, Some(PathBuf::from("/tmp/c.json"))),
            _ => panic!("expected config check"),
        }
    }
}
