use crate::encoding::{decode_lossy, strip_bom};
use crate::process::{ProcessState, ProcessSupervisor, TimeoutKind};
use crate::report::{has_completion_marker, parse};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing policy for one monitored review attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    /// Longest allowed gap without output (or artifact changes).
    pub idle_timeout: Duration,
    /// Longest allowed total runtime.
    pub absolute_timeout: Duration,
    /// Sleep between polls; also the bound on reaction time.
    pub poll_interval: Duration,
    /// Grace given to the tool after a timeout or completion.
    pub terminate_grace: Duration,
    /// Grace given to the tool after cancellation.
    pub cancel_grace: Duration,
    /// How long an artifact without the completion marker must stay
    /// unchanged before it counts as finished.
    pub artifact_settle: Duration,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            absolute_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
            terminate_grace: Duration::from_secs(3),
            cancel_grace: Duration::from_secs(2),
            artifact_settle: Duration::from_secs(10),
        }
    }
}

impl MonitorPolicy {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_absolute_timeout(mut self, timeout: Duration) -> Self {
        self.absolute_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_artifact_settle(mut self, settle: Duration) -> Self {
        self.artifact_settle = settle;
        self
    }
}

/// How a monitored attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOutcome {
    /// Always terminal.
    pub state: ProcessState,
    /// Set when `state` is `TimedOut`.
    pub timeout: Option<TimeoutKind>,
    /// Time from start to the verdict, excluding termination grace.
    pub elapsed: Duration,
    pub exit_code: Option<i32>,
    /// Artifact text, when the file exists and is not empty.
    pub artifact: Option<String>,
    pub log_tail: String,
}

/// Drives a running [`ProcessSupervisor`] to a terminal state.
///
/// Each cycle checks, in order: cancellation, new output, process exit,
/// artifact completion, absolute timeout, idle timeout. Cancellation is
/// checked first so it wins over a timeout that fires in the same cycle.
pub struct ActivityMonitor<'a> {
    supervisor: &'a mut ProcessSupervisor,
    policy: MonitorPolicy,
    artifact_path: PathBuf,
}

struct Settling {
    since: Instant,
    content: String,
}

impl<'a> ActivityMonitor<'a> {
    pub fn new(
        supervisor: &'a mut ProcessSupervisor,
        policy: MonitorPolicy,
        artifact_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            policy,
            artifact_path: artifact_path.into(),
        }
    }

    pub async fn run(mut self, cancel: &CancellationToken) -> MonitorOutcome {
        let start = self.supervisor.started_at().unwrap_or_else(Instant::now);
        let mut last_activity = start;
        let mut settling: Option<Settling> = None;

        loop {
            if cancel.is_cancelled() {
                info!(pid = ?self.supervisor.handle().pid, "Cancellation requested");
                return self
                    .finish(ProcessState::Cancelled, None, self.policy.cancel_grace, start)
                    .await;
            }

            let (output, alive) = self.supervisor.poll();
            let now = Instant::now();
            if !output.is_empty() {
                last_activity = now;
            }

            if !alive {
                self.supervisor.drain().await;
                let state = if read_artifact(&self.artifact_path).is_some() {
                    ProcessState::Completed
                } else {
                    warn!(
                        exit_code = ?self.supervisor.exit_code(),
                        artifact = %self.artifact_path.display(),
                        "Review tool exited without writing the artifact"
                    );
                    ProcessState::Crashed
                };
                return self
                    .finish(state, None, self.policy.terminate_grace, start)
                    .await;
            }

            if let Some(content) = read_artifact(&self.artifact_path) {
                if parse(&content).is_ok() {
                    if has_completion_marker(&content) {
                        info!("Artifact complete, stopping resident review tool");
                        return self
                            .finish(ProcessState::Completed, None, self.policy.terminate_grace, start)
                            .await;
                    }
                    let settled_since = settling
                        .as_ref()
                        .filter(|s| s.content == content)
                        .map(|s| s.since);
                    match settled_since {
                        Some(since) => {
                            if now.duration_since(since) >= self.policy.artifact_settle {
                                info!("Artifact settled, stopping resident review tool");
                                return self
                                    .finish(
                                        ProcessState::Completed,
                                        None,
                                        self.policy.terminate_grace,
                                        start,
                                    )
                                    .await;
                            }
                        }
                        None => {
                            debug!(bytes = content.len(), "Artifact changed");
                            last_activity = now;
                            settling = Some(Settling { since: now, content });
                        }
                    }
                } else {
                    settling = None;
                }
            } else {
                settling = None;
            }

            let elapsed = now.duration_since(start);
            if elapsed >= self.policy.absolute_timeout {
                warn!(elapsed_secs = elapsed.as_secs(), "Absolute timeout reached");
                return self
                    .finish(
                        ProcessState::TimedOut,
                        Some(TimeoutKind::Absolute),
                        self.policy.terminate_grace,
                        start,
                    )
                    .await;
            }
            let idle = now.duration_since(last_activity);
            if idle >= self.policy.idle_timeout {
                warn!(idle_secs = idle.as_secs(), "Idle timeout reached");
                return self
                    .finish(
                        ProcessState::TimedOut,
                        Some(TimeoutKind::Idle),
                        self.policy.terminate_grace,
                        start,
                    )
                    .await;
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(self.policy.poll_interval) => {}
            }
        }
    }

    async fn finish(
        &mut self,
        state: ProcessState,
        timeout: Option<TimeoutKind>,
        grace: Duration,
        start: Instant,
    ) -> MonitorOutcome {
        let elapsed = start.elapsed();
        self.supervisor.transition(state);
        self.supervisor.terminate(grace).await;

        let outcome = MonitorOutcome {
            state: self.supervisor.state(),
            timeout,
            elapsed,
            exit_code: self.supervisor.exit_code(),
            artifact: read_artifact(&self.artifact_path),
            log_tail: self.supervisor.log_tail(),
        };
        info!(
            state = %outcome.state,
            elapsed_secs = outcome.elapsed.as_secs_f64(),
            exit_code = ?outcome.exit_code,
            "Review attempt finished"
        );
        outcome
    }
}

/// Artifact text decoded to UTF-8, or `None` when missing or blank.
fn read_artifact(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let decoded = decode_lossy(&bytes);
    let text = strip_bom(&decoded);
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use tempfile::tempdir;

    const REPORT: &str = "# Review Report\n## Status\napproved\n## Summary\nFine.\n";

    fn fast_policy() -> MonitorPolicy {
        MonitorPolicy::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_idle_timeout(Duration::from_secs(20))
            .with_absolute_timeout(Duration::from_secs(20))
            .with_terminate_grace(Duration::from_millis(500))
            .with_cancel_grace(Duration::from_millis(500))
            .with_artifact_settle(Duration::from_millis(300))
    }

    fn start(script: &str, dir: &Path) -> ProcessSupervisor {
        let mut supervisor = ProcessSupervisor::new();
        supervisor
            .start(&CommandSpec::new("sh", dir).with_args(["-c", script]))
            .unwrap();
        supervisor
    }

    fn write_artifact_script(artifact: &Path, content: &str, then: &str) -> String {
        let staged = artifact.with_extension("staged");
        std::fs::write(&staged, content).unwrap();
        format!(
            "sleep 0.2; mv {} {}; {}",
            staged.display(),
            artifact.display(),
            then
        )
    }

    #[tokio::test]
    async fn test_idle_timeout_terminates_silent_process() {
        let dir = tempdir().unwrap();
        let mut supervisor = start("sleep 30", dir.path());
        let idle = Duration::from_millis(300);
        let policy = fast_policy().with_idle_timeout(idle);
        let slack = Duration::from_millis(200);

        let outcome = ActivityMonitor::new(&mut supervisor, policy, dir.path().join("report.md"))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::TimedOut);
        assert_eq!(outcome.timeout, Some(TimeoutKind::Idle));
        assert!(outcome.elapsed >= idle);
        assert!(
            outcome.elapsed <= idle + policy.poll_interval + slack,
            "idle timeout detected late: {:?}",
            outcome.elapsed
        );
        assert!(supervisor.has_exited());
    }

    #[tokio::test]
    async fn test_absolute_timeout_despite_activity() {
        let dir = tempdir().unwrap();
        let mut supervisor = start("while true; do echo tick; sleep 0.05; done", dir.path());
        let policy = fast_policy()
            .with_idle_timeout(Duration::from_secs(5))
            .with_absolute_timeout(Duration::from_millis(400));

        let outcome = ActivityMonitor::new(&mut supervisor, policy, dir.path().join("report.md"))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::TimedOut);
        assert_eq!(outcome.timeout, Some(TimeoutKind::Absolute));
        assert!(outcome.elapsed >= policy.absolute_timeout);
        assert!(
            outcome.elapsed
                <= policy.absolute_timeout + policy.poll_interval + Duration::from_millis(200)
        );
        assert!(outcome.log_tail.contains("tick"));
    }

    #[tokio::test]
    async fn test_cancellation_takes_precedence_over_timeout() {
        let dir = tempdir().unwrap();
        let mut supervisor = start("sleep 30", dir.path());
        let policy = fast_policy()
            .with_idle_timeout(Duration::ZERO)
            .with_absolute_timeout(Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ActivityMonitor::new(&mut supervisor, policy, dir.path().join("report.md"))
            .run(&cancel)
            .await;

        assert_eq!(outcome.state, ProcessState::Cancelled);
        assert_eq!(outcome.timeout, None);
    }

    #[tokio::test]
    async fn test_cancellation_mid_run() {
        let dir = tempdir().unwrap();
        let mut supervisor = start("sleep 30", dir.path());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = ActivityMonitor::new(&mut supervisor, fast_policy(), dir.path().join("report.md"))
            .run(&cancel)
            .await;

        assert_eq!(outcome.state, ProcessState::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(supervisor.has_exited());
    }

    #[tokio::test]
    async fn test_exit_without_artifact_is_crash() {
        let dir = tempdir().unwrap();
        let mut supervisor = start("echo boom >&2; exit 3", dir.path());

        let outcome = ActivityMonitor::new(&mut supervisor, fast_policy(), dir.path().join("report.md"))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::Crashed);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.artifact, None);
        assert!(outcome.log_tail.contains("boom"));
    }

    #[tokio::test]
    async fn test_exit_with_artifact_is_completed() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("report.md");
        let script = write_artifact_script(&artifact, REPORT, "exit 0");
        let mut supervisor = start(&script, dir.path());

        let outcome = ActivityMonitor::new(&mut supervisor, fast_policy(), &artifact)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::Completed);
        assert_eq!(outcome.artifact.as_deref(), Some(REPORT));
    }

    #[tokio::test]
    async fn test_resident_tool_completes_on_marker() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("report.md");
        let content = format!("{}<!-- REVIEW_COMPLETE -->\n", REPORT);
        let script = write_artifact_script(&artifact, &content, "sleep 30");
        let mut supervisor = start(&script, dir.path());
        // Settle window far beyond the test budget: only the marker can end it
        let policy = fast_policy().with_artifact_settle(Duration::from_secs(60));

        let started = std::time::Instant::now();
        let outcome = ActivityMonitor::new(&mut supervisor, policy, &artifact)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::Completed);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(supervisor.has_exited());
    }

    #[tokio::test]
    async fn test_resident_tool_completes_after_settle() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("report.md");
        let script = write_artifact_script(&artifact, REPORT, "sleep 30");
        let mut supervisor = start(&script, dir.path());

        let outcome = ActivityMonitor::new(&mut supervisor, fast_policy(), &artifact)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::Completed);
        assert!(outcome.elapsed >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_unparseable_artifact_does_not_complete_early() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("report.md");
        let script = write_artifact_script(&artifact, "still thinking...", "sleep 30");
        let mut supervisor = start(&script, dir.path());
        let policy = fast_policy().with_idle_timeout(Duration::from_millis(800));

        let outcome = ActivityMonitor::new(&mut supervisor, policy, &artifact)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ProcessState::TimedOut);
        assert_eq!(outcome.artifact.as_deref(), Some("still thinking..."));
    }
}
