//! Session directory maintenance, `crossreview sessions`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::process::ExitCode;

use super::super::{Cli, SessionsCommands};
use crossreview::config::{CliOverrides, Config};
use crossreview::session::SessionStore;
use crossreview::ui::icons::{CHECK, FOLDER};

pub fn cmd_sessions(
    project_dir: &Path,
    cli: &Cli,
    command: Option<SessionsCommands>,
) -> Result<ExitCode> {
    let config = Config::new(
        project_dir,
        CliOverrides {
            verbose: cli.verbose,
            ..CliOverrides::default()
        },
    )?;
    let store = SessionStore::new(&config.sessions_dir);

    match command {
        None | Some(SessionsCommands::List) => {
            let sessions = store.list().context("Failed to list sessions")?;
            if sessions.is_empty() {
                println!("No sessions in {}", config.sessions_dir.display());
                return Ok(ExitCode::SUCCESS);
            }
            println!("{}{}", FOLDER, config.sessions_dir.display());
            for entry in &sessions {
                println!(
                    "  {}  {}",
                    style(entry.created_at.format("%Y-%m-%d %H:%M:%S UTC")).dim(),
                    entry.id
                );
            }
            println!();
            println!(
                "{} session(s), keeping the newest {}",
                sessions.len(),
                config.retain_sessions
            );
        }
        Some(SessionsCommands::Prune { keep }) => {
            let keep = keep.unwrap_or(config.retain_sessions);
            let report = store.prune(keep).context("Failed to prune sessions")?;
            for path in &report.removed {
                println!("  {} {}", style("removed").red(), path.display());
            }
            println!(
                "{}Removed {} session(s), kept {}",
                CHECK,
                report.removed.len(),
                report.kept
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}
