//! Review artifact parsing and rendering.
//!
//! The artifact is loosely structured markdown. Parsing is line-oriented and
//! tolerant of heading levels, emphasis and minor formatting variance:
//!
//! ```text
//! # Review Report
//! ## Status
//! major_issues
//! ## Issues Found
//! ### P0 - Critical Issues
//! - Null reference in handler
//! ### P1 - Major Issues
//! - None
//! ## Quality Rubric
//! | Dimension | Score | Notes |
//! |-----------|-------|-------|
//! | Performance | Minor | extra allocation |
//! ## Summary
//! One blocking defect.
//! <!-- REVIEW_COMPLETE -->
//! ```
//!
//! Issues are never re-ordered or de-duplicated here.

use super::types::{
    Dimension, DimensionVerdict, Grade, Issue, Location, ReviewReport, ReviewStatus, Severity,
};
use crate::encoding::strip_bom;
use crate::errors::ReportParseError;
use regex::Regex;
use std::sync::LazyLock;

/// Marker the review tool writes as the last line of a finished artifact.
pub const COMPLETION_MARKER: &str = "<!-- REVIEW_COMPLETE -->";

/// Older marker still emitted by some prompts.
pub const LEGACY_COMPLETION_MARKER: &str = "---END_OF_REVIEW---";

static TIER_HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bP([0-2])\b").unwrap());

// "[P1] text", "**[P0]** text", "[P2]: text"
static TIER_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\*\*)?\[\s*P([0-2])\s*\](?:\*\*)?\s*[:\-]?\s*(.*)$").unwrap()
});

static LIST_ITEM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:[-*+]|\d+[.)])\s+(.*)$").unwrap());

// "Status: approved", "**Review Status**: has-major-issues"
static INLINE_STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s>*_-]*(?:review\s+)?status[*_\s]*[:：][*_\s]*(.+)$").unwrap()
});

static LOCATION_WITH_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_.\-/\\]*[A-Za-z0-9_\-]\.[A-Za-z][A-Za-z0-9]{0,7}):(\d+)").unwrap()
});

static BACKTICK_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`([A-Za-z0-9_.\-/\\]*[/\\][A-Za-z0-9_.\-/\\]*\.[A-Za-z][A-Za-z0-9]{0,7})`")
        .unwrap()
});

/// List items that mean "nothing here" rather than an issue.
const PLACEHOLDERS: &[&str] = &[
    "none",
    "n/a",
    "na",
    "nothing",
    "no issues",
    "no issues found",
    "none found",
    "无",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Status,
    Issues(Option<Severity>),
    Rubric,
    Suggestions,
    Summary,
    Other,
}

/// Parse artifact text into a [`ReviewReport`].
///
/// A missing status token is not an error: the report comes back with
/// [`ReviewStatus::Unparsed`]. Only text with no recognizable review
/// structure at all is rejected.
///
/// # Examples
///
/// ```
/// use crossreview::report::{parse, ReviewStatus, Severity};
///
/// let report = parse("## Status\nminor_issues\n### P2 - Minor Issues\n- Rename `tmp`\n").unwrap();
/// assert_eq!(report.status, ReviewStatus::MinorIssues);
/// assert_eq!(report.issues.descriptions(Severity::P2), vec!["Rename `tmp`"]);
/// ```
pub fn parse(artifact_text: &str) -> Result<ReviewReport, ReportParseError> {
    let text = strip_bom(artifact_text);
    if text.trim().is_empty() {
        return Err(ReportParseError::Empty);
    }

    let mut report = ReviewReport::new(ReviewStatus::Unparsed).with_complete(has_completion_marker(text));
    let mut status: Option<ReviewStatus> = None;
    let mut section = Section::Preamble;
    let mut recognized_sections = 0usize;
    let mut last_issue: Option<Severity> = None;
    let mut summary_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if is_marker_line(trimmed) || trimmed.starts_with("```") {
            continue;
        }

        if let Some(title) = heading_title(trimmed) {
            let next = classify_heading(title);
            if section == Section::Summary && next == Section::Other {
                summary_lines.push(line);
                continue;
            }
            section = next;
            if section != Section::Other {
                recognized_sections += 1;
            }
            last_issue = None;
            continue;
        }

        if trimmed.starts_with('|') {
            if let Some((dimension, verdict)) = parse_rubric_row(trimmed) {
                report.dimensions.insert(dimension, verdict);
            }
            if section == Section::Summary {
                summary_lines.push(line);
            }
            continue;
        }

        match section {
            Section::Status => {
                if status.is_none() {
                    status = find_status(trimmed);
                }
            }
            Section::Preamble | Section::Other => {
                if status.is_none()
                    && let Some(cap) = INLINE_STATUS_REGEX.captures(trimmed)
                {
                    status = find_status(&cap[1]);
                }
            }
            Section::Issues(tier) => {
                last_issue = parse_issue_line(line, tier, last_issue, &mut report);
            }
            Section::Suggestions => {
                if let Some(cap) = LIST_ITEM_REGEX.captures(line) {
                    let item = cap[2].trim();
                    if !is_placeholder(item) {
                        report.suggestions.push(item.to_string());
                    }
                }
            }
            Section::Summary => summary_lines.push(line),
            Section::Rubric => {}
        }
    }

    for issues in [
        &mut report.issues.p0,
        &mut report.issues.p1,
        &mut report.issues.p2,
    ] {
        for issue in issues.iter_mut() {
            issue.location = find_location(&issue.description);
        }
    }

    report.summary = summary_lines.join("\n").trim().to_string();

    let evaluated = report
        .dimensions
        .values()
        .any(|v| v.grade != Grade::NotEvaluated);
    if recognized_sections == 0 && status.is_none() && report.issues.is_empty() && !evaluated {
        return Err(ReportParseError::Unrecognized {
            reason: "no status token, review section or rubric row found".to_string(),
        });
    }

    report.status = status.unwrap_or(ReviewStatus::Unparsed);
    Ok(report)
}

/// Whether the text carries either completion marker.
pub fn has_completion_marker(text: &str) -> bool {
    text.contains(COMPLETION_MARKER) || text.contains(LEGACY_COMPLETION_MARKER)
}

/// Handle one line inside an issues section. Returns the tier of the issue
/// that continuation lines should attach to.
fn parse_issue_line(
    line: &str,
    section_tier: Option<Severity>,
    last_issue: Option<Severity>,
    report: &mut ReviewReport,
) -> Option<Severity> {
    let Some(cap) = LIST_ITEM_REGEX.captures(line) else {
        // Wrapped text of the previous item
        if line.starts_with([' ', '\t']) && !line.trim().is_empty() {
            append_to_last(report, last_issue, line.trim());
        }
        return last_issue;
    };

    let indent = cap[1].len();
    let body = cap[2].trim();
    if indent >= 2 && last_issue.is_some() {
        append_to_last(report, last_issue, body);
        return last_issue;
    }

    let (tier, description) = match TIER_TAG_REGEX.captures(body) {
        Some(tag) => (
            tag[1].chars().next().and_then(Severity::from_digit),
            tag.get(2).map_or("", |m| m.as_str()).trim(),
        ),
        None => (section_tier, body),
    };

    if description.is_empty() || is_placeholder(description) {
        return None;
    }
    let tier = tier?;
    report.issues.push(Issue::new(tier, description));
    Some(tier)
}

fn append_to_last(report: &mut ReviewReport, tier: Option<Severity>, text: &str) {
    let Some(tier) = tier else {
        return;
    };
    let issues = match tier {
        Severity::P0 => &mut report.issues.p0,
        Severity::P1 => &mut report.issues.p1,
        Severity::P2 => &mut report.issues.p2,
    };
    if let Some(last) = issues.last_mut() {
        last.description.push(' ');
        last.description.push_str(text);
    }
}

/// ATX heading text; `#42` and `#######` are not headings.
fn heading_title(trimmed: &str) -> Option<&str> {
    let rest = trimmed.trim_start_matches('#');
    let level = trimmed.len() - rest.len();
    if !(1..=6).contains(&level) || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest
        .trim()
        .trim_matches(|c: char| c == '*' || c == '_')
        .trim();
    Some(title)
}

fn classify_heading(title: &str) -> Section {
    if let Some(cap) = TIER_HEADING_REGEX.captures(title) {
        return Section::Issues(cap[1].chars().next().and_then(Severity::from_digit));
    }

    let lower = title.to_lowercase();
    if lower.contains("issue") || lower.contains("finding") {
        let tier = if lower.contains("critical") {
            Some(Severity::P0)
        } else if lower.contains("major") {
            Some(Severity::P1)
        } else if lower.contains("minor") {
            Some(Severity::P2)
        } else {
            None
        };
        return Section::Issues(tier);
    }
    if lower.contains("status") || lower.contains("verdict") {
        return Section::Status;
    }
    if lower.contains("rubric") || lower.contains("quality") || lower.contains("dimension") {
        return Section::Rubric;
    }
    if lower.contains("suggestion") || lower.contains("recommendation") {
        return Section::Suggestions;
    }
    if lower.contains("summary") || lower.contains("conclusion") {
        return Section::Summary;
    }
    Section::Other
}

/// The whole value must be a status token; "Not approved" is no status.
fn find_status(text: &str) -> Option<ReviewStatus> {
    ReviewStatus::from_token(text)
}

fn parse_rubric_row(row: &str) -> Option<(Dimension, DimensionVerdict)> {
    let cells: Vec<&str> = row.trim().trim_matches('|').split('|').map(str::trim).collect();
    if cells.len() < 2 {
        return None;
    }
    let dimension = Dimension::from_label(cells[0])?;

    // Tolerate decorations such as "✅ Pass"
    let score = cells[1].trim_start_matches(|c: char| !c.is_alphanumeric());
    let grade = Grade::from_token(score).unwrap_or(Grade::NotEvaluated);

    let note = cells[2..].join(" | ");
    let note = note.trim();
    let mut verdict = DimensionVerdict::new(grade);
    if !note.is_empty() && note != "-" {
        verdict = verdict.with_note(note);
    }
    Some((dimension, verdict))
}

fn find_location(description: &str) -> Option<Location> {
    if let Some(cap) = LOCATION_WITH_LINE_REGEX.captures(description) {
        return Some(Location {
            file: cap[1].to_string(),
            line: cap[2].parse().ok(),
        });
    }
    BACKTICK_PATH_REGEX.captures(description).map(|cap| Location {
        file: cap[1].to_string(),
        line: None,
    })
}

fn is_marker_line(trimmed: &str) -> bool {
    trimmed == COMPLETION_MARKER || trimmed == LEGACY_COMPLETION_MARKER
}

fn is_placeholder(item: &str) -> bool {
    let cleaned = item
        .trim_matches(|c: char| c == '*' || c == '_' || c == '.' || c.is_whitespace())
        .to_lowercase();
    cleaned.is_empty() || PLACEHOLDERS.contains(&cleaned.as_str())
}

impl ReviewReport {
    /// Render the report in the artifact format the parser reads.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Review Report\n\n## Status\n\n");
        out.push_str(self.status.as_str());
        out.push_str("\n\n## Issues Found\n");

        for severity in Severity::ALL {
            out.push_str(&format!("\n### {}\n\n", severity.heading()));
            let issues = self.issues.get(severity);
            if issues.is_empty() {
                out.push_str("- None\n");
            }
            for issue in issues {
                out.push_str(&format!("- {}\n", issue.description));
            }
        }

        out.push_str("\n## Quality Rubric\n\n");
        out.push_str("| Dimension | Score | Notes |\n");
        out.push_str("|-----------|-------|-------|\n");
        for (dimension, verdict) in &self.dimensions {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                dimension,
                verdict.grade,
                verdict.note.as_deref().unwrap_or("")
            ));
        }

        if !self.suggestions.is_empty() {
            out.push_str("\n## Suggestions\n\n");
            for suggestion in &self.suggestions {
                out.push_str(&format!("- {}\n", suggestion));
            }
        }

        out.push_str("\n## Summary\n\n");
        if !self.summary.is_empty() {
            out.push_str(&self.summary);
            out.push('\n');
        }

        if self.complete {
            out.push('\n');
            out.push_str(COMPLETION_MARKER);
            out.push('\n');
        }
        out
    }
}
