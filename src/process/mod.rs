//! Supervision of the external review process.
//!
//! [`ProcessSupervisor`] owns the child process and its output pipes.
//! [`ActivityMonitor`] borrows a running supervisor and drives it to a
//! terminal [`ProcessState`] by polling for output, watching for the
//! artifact, enforcing the idle and absolute timeouts, and honoring
//! cancellation.
//!
//! ```text
//! Pending ──start──▶ Running ──▶ Completed | TimedOut | Cancelled | Crashed
//! ```
//!
//! Terminal states are final.

pub mod monitor;
pub mod supervisor;

pub use monitor::{ActivityMonitor, MonitorOutcome, MonitorPolicy};
pub use supervisor::{LOG_TAIL_LINES, ProcessSupervisor};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of one supervised process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Pending,
    Running,
    Completed,
    TimedOut,
    Cancelled,
    Crashed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TimedOut | Self::Cancelled | Self::Crashed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which timeout policy fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// No output for longer than the idle threshold.
    Idle,
    /// Total runtime exceeded the absolute threshold.
    Absolute,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Absolute => write!(f, "absolute"),
        }
    }
}

/// Point-in-time view of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    /// Monotonic start time; `None` until spawned.
    pub started_at: Option<Instant>,
    /// Total output bytes consumed so far (stdout and stderr).
    pub bytes_read: u64,
    pub state: ProcessState,
}

impl ProcessHandle {
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|s| s.elapsed()).unwrap_or_default()
    }
}
