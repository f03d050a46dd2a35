//! Review report types.
//!
//! ## Types
//!
//! - [`ReviewStatus`]: Overall verdict written by the review tool
//! - [`Severity`]: P0/P1/P2 issue tier
//! - [`Issue`]: One reported problem with an optional source location
//! - [`IssueGroups`]: Issues grouped by tier, source order preserved
//! - [`Dimension`] / [`Grade`] / [`DimensionVerdict`]: The quality rubric
//! - [`ReviewReport`]: Complete parsed artifact
//!
//! ## Example
//!
//! ```
//! use crossreview::report::{Issue, ReviewReport, ReviewStatus, Severity};
//!
//! let report = ReviewReport::new(ReviewStatus::MajorIssues)
//!     .add_issue(Issue::new(Severity::P0, "Null reference in handler"))
//!     .with_summary("One blocking defect.");
//!
//! assert_eq!(report.issues.get(Severity::P0).len(), 1);
//! assert!(report.issues.get(Severity::P1).is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Overall verdict of a review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// No blocking or major findings.
    Approved,
    /// At least one finding that must be fixed.
    MajorIssues,
    /// Only findings that are worth fixing but not blocking.
    MinorIssues,
    /// No recognizable status token in the artifact.
    #[default]
    Unparsed,
}

impl ReviewStatus {
    /// Recognize a status token, tolerant of case, separators and the
    /// `has-` prefix some tools emit.
    ///
    /// # Examples
    ///
    /// ```
    /// use crossreview::report::ReviewStatus;
    ///
    /// assert_eq!(ReviewStatus::from_token("approved"), Some(ReviewStatus::Approved));
    /// assert_eq!(ReviewStatus::from_token("Has-Major-Issues"), Some(ReviewStatus::MajorIssues));
    /// assert_eq!(ReviewStatus::from_token("MINOR ISSUES"), Some(ReviewStatus::MinorIssues));
    /// assert_eq!(ReviewStatus::from_token("**approved**"), Some(ReviewStatus::Approved));
    /// assert_eq!(ReviewStatus::from_token("not approved"), None);
    /// assert_eq!(ReviewStatus::from_token("maybe"), None);
    /// ```
    pub fn from_token(token: &str) -> Option<Self> {
        let normalized: String = token
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        let normalized = normalized.strip_prefix("has_").unwrap_or(&normalized);
        match normalized {
            "approved" => Some(Self::Approved),
            "major_issues" => Some(Self::MajorIssues),
            "minor_issues" => Some(Self::MinorIssues),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::MajorIssues => "major_issues",
            Self::MinorIssues => "minor_issues",
            Self::Unparsed => "unparsed",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Issue severity tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Severity {
    /// Critical, must fix.
    P0,
    /// Major, recommended fix.
    P1,
    /// Minor, optional fix.
    P2,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::P0, Severity::P1, Severity::P2];

    /// Parse a tier digit ("0", "1", "2").
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '0' => Some(Self::P0),
            '1' => Some(Self::P1),
            '2' => Some(Self::P2),
            _ => None,
        }
    }

    /// Section heading used when rendering an artifact.
    pub fn heading(&self) -> &'static str {
        match self {
            Self::P0 => "P0 - Critical Issues",
            Self::P1 => "P1 - Major Issues",
            Self::P2 => "P2 - Minor Issues",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        };
        write!(f, "{}", s)
    }
}

/// A `file:line` reference found in an issue description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.file, line),
            None => write!(f, "{}", self.file),
        }
    }
}

/// A single issue reported by the review tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Issue {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            location: None,
        }
    }

}

/// Issues grouped by severity tier. Order within a tier is the order in
/// which the tool wrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueGroups {
    #[serde(rename = "P0")]
    pub p0: Vec<Issue>,
    #[serde(rename = "P1")]
    pub p1: Vec<Issue>,
    #[serde(rename = "P2")]
    pub p2: Vec<Issue>,
}

impl IssueGroups {
    pub fn get(&self, severity: Severity) -> &[Issue] {
        match severity {
            Severity::P0 => &self.p0,
            Severity::P1 => &self.p1,
            Severity::P2 => &self.p2,
        }
    }

    pub fn push(&mut self, issue: Issue) {
        match issue.severity {
            Severity::P0 => self.p0.push(issue),
            Severity::P1 => self.p1.push(issue),
            Severity::P2 => self.p2.push(issue),
        }
    }

    /// Descriptions of one tier, in source order.
    pub fn descriptions(&self, severity: Severity) -> Vec<&str> {
        self.get(severity)
            .iter()
            .map(|i| i.description.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.p0.len() + self.p1.len() + self.p2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All issues, tier by tier.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.p0.iter().chain(self.p1.iter()).chain(self.p2.iter())
    }
}

/// The fixed set of quality dimensions in the rubric table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Dimension {
    Completeness,
    Correctness,
    #[serde(rename = "Best Practices")]
    BestPractices,
    Performance,
    Maintainability,
    Security,
    #[serde(rename = "Backward Compatibility")]
    BackwardCompatibility,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::Completeness,
        Dimension::Correctness,
        Dimension::BestPractices,
        Dimension::Performance,
        Dimension::Maintainability,
        Dimension::Security,
        Dimension::BackwardCompatibility,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Completeness => "Completeness",
            Self::Correctness => "Correctness",
            Self::BestPractices => "Best Practices",
            Self::Performance => "Performance",
            Self::Maintainability => "Maintainability",
            Self::Security => "Security",
            Self::BackwardCompatibility => "Backward Compatibility",
        }
    }

    /// Match a rubric row label, ignoring case, emphasis and spacing.
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        Self::ALL.into_iter().find(|d| {
            d.name()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
                == key
        })
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Graded verdict for one quality dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Pass,
    Minor,
    Major,
    Critical,
    /// The dimension did not appear in the artifact or had no usable score.
    #[default]
    NotEvaluated,
}

impl Grade {
    pub fn from_token(token: &str) -> Option<Self> {
        let cleaned = token
            .trim()
            .trim_matches(|c: char| c == '*' || c == '`')
            .to_lowercase();
        match cleaned.as_str() {
            "pass" | "passed" | "ok" => Some(Self::Pass),
            "minor" => Some(Self::Minor),
            "major" => Some(Self::Major),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "Pass",
            Self::Minor => "Minor",
            Self::Major => "Major",
            Self::Critical => "Critical",
            Self::NotEvaluated => "Not Evaluated",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Grade plus the reviewer's note for one dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionVerdict {
    pub grade: Grade,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DimensionVerdict {
    pub fn new(grade: Grade) -> Self {
        Self { grade, note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn not_evaluated() -> Self {
        Self::default()
    }
}

/// A review result parsed from the tool's artifact.
///
/// Built once by the parser (or by the builder methods in tests) and not
/// mutated afterwards by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub status: ReviewStatus,
    pub issues: IssueGroups,
    /// Every known dimension is present; absent ones are `NotEvaluated`.
    pub dimensions: BTreeMap<Dimension, DimensionVerdict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub summary: String,
    /// Whether the tool wrote the completion marker.
    pub complete: bool,
}

impl ReviewReport {
    pub fn new(status: ReviewStatus) -> Self {
        Self {
            status,
            issues: IssueGroups::default(),
            dimensions: Dimension::ALL
                .into_iter()
                .map(|d| (d, DimensionVerdict::not_evaluated()))
                .collect(),
            suggestions: Vec::new(),
            summary: String::new(),
            complete: false,
        }
    }

    /// Report used when the artifact could not be parsed at all.
    pub fn unparsed() -> Self {
        Self::new(ReviewStatus::Unparsed)
    }

    pub fn add_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension, verdict: DimensionVerdict) -> Self {
        self.dimensions.insert(dimension, verdict);
        self
    }

    /// Grade every dimension with the same verdict.
    pub fn with_all_dimensions(mut self, grade: Grade) -> Self {
        for d in Dimension::ALL {
            self.dimensions.insert(d, DimensionVerdict::new(grade));
        }
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn add_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    pub fn dimension(&self, dimension: Dimension) -> &DimensionVerdict {
        static NOT_EVALUATED: DimensionVerdict = DimensionVerdict {
            grade: Grade::NotEvaluated,
            note: None,
        };
        self.dimensions.get(&dimension).unwrap_or(&NOT_EVALUATED)
    }

    pub fn has_blocking_issues(&self) -> bool {
        !self.issues.p0.is_empty()
    }
}

impl fmt::Display for ReviewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (P0: {}, P1: {}, P2: {})",
            self.status,
            self.issues.p0.len(),
            self.issues.p1.len(),
            self.issues.p2.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_has_every_dimension_not_evaluated() {
        let report = ReviewReport::new(ReviewStatus::Approved);
        assert_eq!(report.dimensions.len(), Dimension::ALL.len());
        assert!(
            report
                .dimensions
                .values()
                .all(|v| v.grade == Grade::NotEvaluated)
        );
    }

    #[test]
    fn test_issue_groups_preserve_order() {
        let mut groups = IssueGroups::default();
        groups.push(Issue::new(Severity::P2, "b"));
        groups.push(Issue::new(Severity::P0, "x"));
        groups.push(Issue::new(Severity::P2, "a"));
        assert_eq!(groups.descriptions(Severity::P2), vec!["b", "a"]);
        assert_eq!(groups.descriptions(Severity::P0), vec!["x"]);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_dimension_from_label() {
        assert_eq!(
            Dimension::from_label("**Best Practices**"),
            Some(Dimension::BestPractices)
        );
        assert_eq!(
            Dimension::from_label("backward compatibility"),
            Some(Dimension::BackwardCompatibility)
        );
        assert_eq!(Dimension::from_label("Dimension"), None);
    }

    #[test]
    fn test_grade_from_token() {
        assert_eq!(Grade::from_token("**Pass**"), Some(Grade::Pass));
        assert_eq!(Grade::from_token("minor"), Some(Grade::Minor));
        assert_eq!(Grade::from_token("Pass/Minor/Major/Critical"), None);
    }

    #[test]
    fn test_report_serializes_tiers_by_name() {
        let report = ReviewReport::new(ReviewStatus::MinorIssues)
            .add_issue(Issue::new(Severity::P2, "naming"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "minor_issues");
        assert_eq!(json["issues"]["P2"][0]["description"], "naming");
    }
}
