//! Review reports produced by the external tool.
//!
//! ## Components
//!
//! - [`types`]: Typed review result (status, tiered issues, rubric, summary)
//! - [`parser`]: Artifact markdown to [`ReviewReport`] and back
//!
//! ## Example
//!
//! ```
//! use crossreview::report::{parse, Dimension, Grade, ReviewReport, ReviewStatus};
//!
//! let report = ReviewReport::new(ReviewStatus::Approved).with_all_dimensions(Grade::Pass);
//! let parsed = parse(&report.to_markdown()).unwrap();
//!
//! assert_eq!(parsed.status, ReviewStatus::Approved);
//! assert_eq!(parsed.dimension(Dimension::Security).grade, Grade::Pass);
//! ```

pub mod parser;
pub mod types;

pub use parser::{COMPLETION_MARKER, LEGACY_COMPLETION_MARKER, has_completion_marker, parse};
pub use types::{
    Dimension, DimensionVerdict, Grade, Issue, IssueGroups, Location, ReviewReport, ReviewStatus,
    Severity,
};
