//! Configuration view and validation commands, `crossreview config`.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;

use super::super::ConfigCommands;
use crossreview::settings::{self, SettingsToml, project_config_path, user_config_path};

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<ExitCode> {
    let project_dir = project_dir
        .canonicalize()
        .context("Failed to resolve project directory")?;
    let config_path = project_config_path(&project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("crossreview configuration");
            println!("=========================");
            println!();
            for (label, path) in [
                ("User file", user_config_path()),
                ("Project file", Some(config_path.clone())),
            ] {
                match path {
                    Some(path) if path.exists() => println!("{}: {}", label, path.display()),
                    Some(path) => println!("{}: {} (not present)", label, path.display()),
                    None => println!("{}: (no config directory)", label),
                }
            }
            println!();

            let settings = settings::load(&project_dir)?;
            println!("Effective values (files, built-ins and {}):", settings::TOOL_ENV_VAR);
            println!();
            let rendered =
                toml::to_string_pretty(&settings).context("Failed to serialize configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let settings = settings::load(&project_dir)?;
            let problems = settings.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
                println!();
            } else {
                println!("Configuration problems:");
                for problem in problems {
                    println!("  - {}", problem);
                }
                println!();
                return Ok(ExitCode::FAILURE);
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("config.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(ExitCode::SUCCESS);
            }

            SettingsToml::default().save(&config_path)?;

            println!("Created config.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [review] tool, timeouts, retain_sessions, max_iterations");
            println!("  - [env] variables passed to every tool");
            println!("  - [tools.<name>] executable, args, artifact_name, log_file_name");
            println!();
        }
    }

    Ok(ExitCode::SUCCESS)
}
