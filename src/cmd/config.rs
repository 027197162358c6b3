//! Configuration view and validation commands: `kartavya config`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use kartavya::config::{CliOverrides, Config, KartavyaToml};

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    overrides: &CliOverrides,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", style("Kartavya Configuration").bold());
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!(
                    "No kartavya.toml found at {}; using defaults.",
                    config_path.display()
                );
            }
            println!();

            let config = Config::load(config_path, overrides)?;
            let mut effective = KartavyaToml::from(&config);
            if effective.auth.token_secret.is_some() {
                effective.auth.token_secret = Some("<redacted>".to_string());
            }
            println!("Effective values (with env/CLI overrides):");
            println!();
            let rendered = toml::to_string_pretty(&effective)
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                KartavyaToml::load(config_path)?
            } else {
                println!("No kartavya.toml found. Checking defaults.");
                KartavyaToml::default()
            };
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("kartavya.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            KartavyaToml::default().save(config_path)?;

            println!("Created kartavya.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [database] path");
            println!("  - [auth] token_secret, token_ttl_secs");
            println!("  - [logging] filter, format");
            println!();
        }
    }

    Ok(())
}
