//! Offline report parsing, `crossreview report`, plus the human rendering
//! of a parsed report shared with `crossreview review`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::process::ExitCode;

use crossreview::encoding::{decode_lossy, strip_bom};
use crossreview::report::{Dimension, Grade, ReviewReport, ReviewStatus, Severity, parse};
use crossreview::ui::icons::WARN;

pub fn cmd_report(file: &Path, json: bool) -> Result<ExitCode> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read report: {}", file.display()))?;
    let decoded = decode_lossy(&bytes);
    let report = parse(strip_bom(&decoded))
        .with_context(|| format!("Failed to parse report: {}", file.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn styled_status(status: ReviewStatus) -> String {
    match status {
        ReviewStatus::Approved => style(status).green().bold().to_string(),
        ReviewStatus::MinorIssues => style(status).yellow().bold().to_string(),
        ReviewStatus::MajorIssues => style(status).red().bold().to_string(),
        ReviewStatus::Unparsed => style(status).dim().to_string(),
    }
}

fn styled_grade(grade: Grade) -> String {
    let text = format!("{:<13}", grade.as_str());
    match grade {
        Grade::Pass => style(text).green().to_string(),
        Grade::Minor => style(text).yellow().to_string(),
        Grade::Major | Grade::Critical => style(text).red().to_string(),
        Grade::NotEvaluated => style(text).dim().to_string(),
    }
}

/// Print a parsed report for a human reader.
pub fn print_report(report: &ReviewReport) {
    println!();
    println!("Status: {}", styled_status(report.status));
    if report.status.is_approved() && report.has_blocking_issues() {
        println!(
            "{}{}",
            WARN,
            style("Report is approved but lists P0 issues").yellow()
        );
    }
    if !report.complete {
        println!(
            "{}{}",
            WARN,
            style("Report has no completion marker; it may be truncated").yellow()
        );
    }
    println!();

    for severity in Severity::ALL {
        let issues = report.issues.get(severity);
        println!("{} ({})", style(severity.heading()).bold(), issues.len());
        for issue in issues {
            match &issue.location {
                Some(location) => println!(
                    "  - {} {}",
                    issue.description,
                    style(format!("[{}]", location)).dim()
                ),
                None => println!("  - {}", issue.description),
            }
        }
    }
    println!();

    println!("{}", style("Quality Rubric").bold());
    for dimension in Dimension::ALL {
        let verdict = report.dimension(dimension);
        let note = verdict.note.as_deref().unwrap_or("");
        println!(
            "  {:<24} {} {}",
            dimension.name(),
            styled_grade(verdict.grade),
            style(note).dim()
        );
    }

    if !report.suggestions.is_empty() {
        println!();
        println!("{}", style("Suggestions").bold());
        for suggestion in &report.suggestions {
            println!("  - {}", suggestion);
        }
    }

    if !report.summary.is_empty() {
        println!();
        println!("{}", style("Summary").bold());
        for line in report.summary.lines() {
            println!("  {}", line);
        }
    }
    println!();
}
