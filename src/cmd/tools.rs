//! Capability table listing and availability probe, `crossreview tools`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::process::ExitCode;

use super::super::Cli;
use crossreview::command::probe::{PROBE_TIMEOUT, ProbeResult, probe_tool};
use crossreview::config::{CliOverrides, Config};
use crossreview::ui::icons::{CHECK, CROSS};

pub async fn cmd_tools(project_dir: &Path, cli: &Cli, check: bool) -> Result<ExitCode> {
    let config = Config::new(
        project_dir,
        CliOverrides {
            verbose: cli.verbose,
            ..CliOverrides::default()
        },
    )?;

    println!();
    println!("Review tools");
    println!("============");
    println!();

    let mut missing = 0;
    for tool in config.tools.iter() {
        let marker = if tool.name() == config.active_tool {
            style("*").green().bold().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<10} {}  {}",
            marker,
            style(tool.name()).bold(),
            tool.executable(),
            style(format!("→ {}, log {}", tool.artifact_name(), tool.log_file_name())).dim()
        );

        if !check {
            continue;
        }
        let result = probe_tool(tool.as_ref(), PROBE_TIMEOUT).await;
        let line = match &result {
            ProbeResult::Available { version } => format!(
                "{}{}",
                CHECK,
                version.as_deref().unwrap_or("available")
            ),
            ProbeResult::NotFound => format!("{}not found", CROSS),
            ProbeResult::TimedOut => format!(
                "{}no answer to --version within {}s",
                CROSS,
                PROBE_TIMEOUT.as_secs()
            ),
            ProbeResult::Failed { exit_code } => format!(
                "{}--version failed (exit code {})",
                CROSS,
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ),
            ProbeResult::Error { message } => format!("{}{}", CROSS, message),
        };
        println!("             {}", line);
        if !result.is_available() {
            missing += 1;
            if let Some(hint) = tool.install_hint() {
                println!("             {} {}", style("install:").dim(), hint);
            }
        }
    }

    println!();
    println!("Active tool: {}", style(&config.active_tool).cyan());
    if check && missing > 0 {
        println!("{} tool(s) unavailable", missing);
    }
    println!();
    Ok(ExitCode::SUCCESS)
}
