//! Config check command handler.

use anyhow::{Context, Result};

use zeptocord::config::validate::{validate_config, DiagnosticLevel};
use zeptocord::config::Config;

use super::ConfigAction;

/// Validate configuration file and environment.
pub(crate) async fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { config } => {
            let config_path = config.unwrap_or_else(Config::path);
            println!("Config file: {}", config_path.display());

            let mut errors = 0;
            let mut warnings = 0;

            if config_path.exists() {
                let content = std::fs::read_to_string(&config_path)
                    .context("Failed to read config file")?;
                match serde_json::from_str::<serde_json::Value>(&content) {
                    Ok(raw) => {
                        for diag in validate_config(&raw) {
                            println!("{}", diag);
                            match diag.level {
                                DiagnosticLevel::Error => errors += 1,
                                DiagnosticLevel::Warn => warnings += 1,
                            }
                        }
                    }
                    Err(e) => {
                        println!("[ERROR] Invalid JSON: {}", e);
                        errors += 1;
                    }
                }
            } else {
                println!("[OK] No config file found (using defaults and environment)");
            }

            if errors == 0 {
                let loaded = Config::load_from_path(&config_path)
                    .context("Failed to load configuration")?;
                if let Err(e) = loaded.validate() {
                    println!("[ERROR] {}", e);
                    errors += 1;
                }
            }

            if errors == 0 && warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s), {} warning(s)", errors, warnings);
            }
        }
    }
    Ok(())
}
