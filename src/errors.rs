//! Typed error hierarchy for crossreview.
//!
//! One enum per subsystem, plus the workflow-level taxonomy that callers see:
//! - `SessionError`: session directory allocation and document copying
//! - `LaunchError`: spawning the external review tool
//! - `ReportParseError`: artifact text that cannot be read as a review
//! - `ReviewError`: the classified failure returned by the workflow

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::process::{ProcessState, TimeoutKind};

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot decode {path} as any of: {tried}")]
    Encoding { path: PathBuf, tried: String },

    #[error("Invalid task document name '{name}': {reason}")]
    InvalidTaskName { name: String, reason: String },
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from launching the external tool.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Review tool '{executable}' was not found on PATH")]
    NotFound {
        executable: String,
        install_hint: Option<String>,
    },

    #[error("Review tool '{executable}' could not be executed: permission denied")]
    PermissionDenied { executable: String },

    #[error("Failed to spawn review tool '{executable}': {source}")]
    Transient {
        executable: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Classify a spawn failure. Only failures that might go away on their
    /// own (resource exhaustion, interrupted calls) are transient.
    pub fn from_spawn(
        executable: &str,
        install_hint: Option<&str>,
        source: std::io::Error,
    ) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                executable: executable.to_string(),
                install_hint: install_hint.map(str::to_string),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                executable: executable.to_string(),
            },
            _ => Self::Transient {
                executable: executable.to_string(),
                source,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// The artifact exists but is not recognizable as a review report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportParseError {
    #[error("Report is empty")]
    Empty,

    #[error("Report structure not recognized: {reason}")]
    Unrecognized { reason: String },
}

/// Where a failed review left its traces, when it got far enough to have any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureContext {
    pub session_dir: Option<PathBuf>,
    pub log_tail: String,
    /// Artifact text the tool had written before it was stopped.
    pub artifact: Option<String>,
}

/// Classified failure of a review workflow.
///
/// Every variant answers two questions for the caller: can it be retried,
/// and did the external tool ever run (install/reconfigure vs. read the log).
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Invalid review request: {0}")]
    Validation(String),

    #[error("Session setup failed: {0}")]
    SessionIo(#[source] SessionError),

    #[error("{source}{}", install_suffix(.source))]
    ToolLaunch {
        tool: String,
        #[source]
        source: LaunchError,
    },

    #[error("Review tool timed out ({kind}) after {:.1}s", secs(.elapsed))]
    ProcessTimeout {
        kind: TimeoutKind,
        elapsed: Duration,
        context: FailureContext,
    },

    #[error("{}", crash_message(.exit_code, .attempts, .exhausted))]
    ProcessCrash {
        exit_code: Option<i32>,
        attempts: u32,
        exhausted: bool,
        context: FailureContext,
    },

    #[error("Review was cancelled")]
    Cancelled { context: FailureContext },
}

fn secs(elapsed: &Duration) -> f64 {
    elapsed.as_secs_f64()
}

fn crash_message(exit_code: &Option<i32>, attempts: &u32, exhausted: &bool) -> String {
    let code = exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
    let mut msg = format!(
        "Review tool exited without producing a report (exit code {})",
        code
    );
    if *exhausted {
        msg.push_str(&format!("; retries exhausted after {} attempts", attempts));
    }
    msg
}

fn install_suffix(source: &LaunchError) -> String {
    match source {
        LaunchError::NotFound {
            install_hint: Some(hint),
            ..
        } => format!(". Install it with: {}", hint),
        LaunchError::NotFound { .. } => ". Install the tool or select another one".to_string(),
        _ => String::new(),
    }
}

impl ReviewError {
    /// Whether the workflow may relaunch the tool after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProcessCrash { exhausted, .. } => !exhausted,
            Self::ToolLaunch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// True when the external tool never produced any judgment because it
    /// never started, as opposed to running and failing.
    pub fn tool_never_ran(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::SessionIo(_) | Self::ToolLaunch { .. }
        )
    }

    /// Supervisor terminal state behind this failure, if a process ran.
    pub fn terminal_state(&self) -> Option<ProcessState> {
        match self {
            Self::ProcessTimeout { .. } => Some(ProcessState::TimedOut),
            Self::ProcessCrash { .. } => Some(ProcessState::Crashed),
            Self::Cancelled { .. } => Some(ProcessState::Cancelled),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&FailureContext> {
        match self {
            Self::ProcessTimeout { context, .. }
            | Self::ProcessCrash { context, .. }
            | Self::Cancelled { context } => Some(context),
            _ => None,
        }
    }

    /// Short machine-readable classification, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::SessionIo(_) => "session_io_error",
            Self::ToolLaunch { .. } => "tool_launch_error",
            Self::ProcessTimeout { .. } => "process_timeout_error",
            Self::ProcessCrash { .. } => "process_crash_error",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<SessionError> for ReviewError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTaskName { .. } => Self::Validation(err.to_string()),
            other => Self::SessionIo(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_error_not_found_is_fatal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = LaunchError::from_spawn("codex", Some("npm i -g codex"), io_err);
        assert!(matches!(err, LaunchError::NotFound { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn launch_error_other_kinds_are_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WouldBlock, "try again");
        let err = LaunchError::from_spawn("codex", None, io_err);
        assert!(err.is_transient());
    }

    #[test]
    fn tool_launch_message_recommends_installation() {
        let err = ReviewError::ToolLaunch {
            tool: "codex".into(),
            source: LaunchError::NotFound {
                executable: "codex".into(),
                install_hint: Some("npm install -g @openai/codex".into()),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("npm install -g @openai/codex"));
        assert!(err.tool_never_ran());
        assert!(!err.is_retryable());
    }

    #[test]
    fn crash_is_retryable_until_exhausted() {
        let err = ReviewError::ProcessCrash {
            exit_code: Some(1),
            attempts: 1,
            exhausted: false,
            context: FailureContext::default(),
        };
        assert!(err.is_retryable());
        assert!(!err.tool_never_ran());
        assert_eq!(err.terminal_state(), Some(ProcessState::Crashed));

        let err = ReviewError::ProcessCrash {
            exit_code: Some(1),
            attempts: 3,
            exhausted: true,
            context: FailureContext::default(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("retries exhausted after 3 attempts"));
    }

    #[test]
    fn timeouts_and_cancellation_are_not_retryable() {
        let timeout = ReviewError::ProcessTimeout {
            kind: TimeoutKind::Idle,
            elapsed: Duration::from_secs(301),
            context: FailureContext::default(),
        };
        assert!(!timeout.is_retryable());
        assert!(timeout.to_string().contains("after 301.0s"));

        let short = ReviewError::ProcessTimeout {
            kind: TimeoutKind::Idle,
            elapsed: Duration::from_millis(1500),
            context: FailureContext::default(),
        };
        assert!(short.to_string().contains("after 1.5s"));

        let cancelled = ReviewError::Cancelled {
            context: FailureContext::default(),
        };
        assert!(!cancelled.is_retryable());
        assert_eq!(cancelled.terminal_state(), Some(ProcessState::Cancelled));
    }

    #[test]
    fn invalid_task_name_becomes_validation_error() {
        let err: ReviewError = SessionError::InvalidTaskName {
            name: "Task1-Login.md".into(),
            reason: "bad".into(),
        }
        .into();
        assert!(matches!(err, ReviewError::Validation(_)));
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ReportParseError::Empty);
        assert_std_error(&SessionError::Encoding {
            path: PathBuf::from("a.md"),
            tried: "utf-8".into(),
        });
        assert_std_error(&ReviewError::Validation("x".into()));
    }
}
