//! Run one review, `crossreview review`.
//!
//! Exit code 0 means the tool produced a verdict (any verdict, including a
//! report that could not be parsed); 1 means the review failed.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::super::{Cli, ReviewArgs};
use super::report::print_report;
use crossreview::config::{CliOverrides, Config};
use crossreview::errors::ReviewError;
use crossreview::process::ProcessState;
use crossreview::session::DocumentSet;
use crossreview::ui::ReviewProgress;
use crossreview::ui::icons::{CROSS, FOLDER, WARN};
use crossreview::workflow::{ReviewOutcome, ReviewRequest, WorkflowCoordinator};

/// Failure as printed with `--json`.
#[derive(Debug, Serialize)]
struct FailureReport<'a> {
    kind: &'static str,
    message: String,
    retryable: bool,
    tool_never_ran: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal_state: Option<ProcessState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_dir: Option<&'a PathBuf>,
    log_tail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<&'a str>,
}

impl<'a> FailureReport<'a> {
    fn from_error(err: &'a ReviewError) -> Self {
        let context = err.context();
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            tool_never_ran: err.tool_never_ran(),
            terminal_state: err.terminal_state(),
            session_dir: context.and_then(|c| c.session_dir.as_ref()),
            log_tail: context.map(|c| c.log_tail.as_str()).unwrap_or(""),
            artifact: context.and_then(|c| c.artifact.as_deref()),
        }
    }
}

pub async fn cmd_review(project_dir: &Path, cli: &Cli, args: &ReviewArgs) -> Result<ExitCode> {
    let config = Config::new(
        project_dir,
        CliOverrides {
            tool: args.tool.clone(),
            max_iterations: args.max_iterations,
            verbose: cli.verbose,
        },
    )?;

    let mut documents = DocumentSet::new(&args.index, args.tasks.clone());
    if let Some(requirement) = &args.requirement {
        documents = documents.with_requirement(requirement);
    }
    if let Some(planning) = &args.planning {
        documents = documents.with_planning(planning);
    }
    let mut request = ReviewRequest::new(&config.project_dir, documents)
        .with_max_iterations(config.max_iterations)
        .with_tool(&config.active_tool);
    if let Some(initiator) = &args.initiator {
        request = request.with_initiator(initiator);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling review");
            on_interrupt.cancel();
        }
    });

    let mut coordinator = WorkflowCoordinator::new(&config);
    let progress = (!args.json).then(|| {
        Arc::new(ReviewProgress::new(
            &config.active_tool,
            config.max_iterations,
            cli.verbose,
        ))
    });
    if let Some(progress) = &progress {
        coordinator = coordinator.with_observer(progress.clone());
    }

    let result = coordinator.run(request, &cancel).await;
    if let Some(progress) = &progress {
        progress.finish();
    }

    match result {
        Ok(outcome) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
                );
            } else {
                print_outcome(&outcome);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&FailureReport::from_error(&err))
                        .context("Failed to serialize failure")?
                );
            } else {
                print_failure(&err);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_outcome(outcome: &ReviewOutcome) {
    if let Some(kind) = outcome.timed_out {
        println!();
        println!(
            "{}{}",
            WARN,
            style(format!(
                "The review tool hit the {} timeout; the report may be incomplete",
                kind
            ))
            .yellow()
        );
    }
    if let Some(parse_error) = &outcome.parse_error {
        println!();
        println!(
            "{}{}",
            WARN,
            style(format!("The review report could not be parsed: {}", parse_error)).yellow()
        );
        println!("Raw report ({}):", outcome.artifact_path.display());
        println!();
        println!("{}", outcome.raw_artifact);
    } else {
        print_report(&outcome.report);
    }
    println!(
        "{}{} {} after {} attempt(s), {:.1}s",
        FOLDER,
        style("Session:").dim(),
        outcome.session_dir.display(),
        outcome.attempts,
        outcome.elapsed_secs
    );
}

fn print_failure(err: &ReviewError) {
    eprintln!();
    eprintln!("{}{}", CROSS, style(err).red().bold());
    if err.tool_never_ran() {
        eprintln!(
            "  {}",
            style("The review tool did not run; check the inputs, the configuration or the tool installation.").dim()
        );
    }
    if let Some(context) = err.context() {
        if let Some(dir) = &context.session_dir {
            eprintln!("{}{} {}", FOLDER, style("Session:").dim(), dir.display());
        }
        if let Some(artifact) = &context.artifact {
            eprintln!("  {}", style("Partial report:").dim());
            for line in artifact.lines() {
                eprintln!("    {}", line);
            }
        }
        if !context.log_tail.is_empty() {
            eprintln!("  {}", style("Last tool output:").dim());
            for line in context.log_tail.lines() {
                eprintln!("    {}", line);
            }
        }
    }
    eprintln!();
}
