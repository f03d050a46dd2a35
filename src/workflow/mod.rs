//! Review workflow state machine.
//!
//! ```text
//! Initializing → BuildingSession → Launching → Monitoring → Finalizing → Succeeded
//!                                      ▲                        │      ├→ Failed
//!                                      └──── retryable crash ───┘      └→ Aborted
//! ```
//!
//! One [`WorkflowCoordinator::run`] call drives one review. Validation,
//! session and launch failures short-circuit. A crash without an artifact
//! is relaunched until `max_iterations` attempts have been made. Timeouts
//! and cancellation are never retried.

use crate::command::{CommandBuilder, PromptContext, ToolRegistry};
use crate::config::Config;
use crate::errors::{FailureContext, ReviewError};
use crate::process::{ActivityMonitor, MonitorPolicy, ProcessState, ProcessSupervisor, TimeoutKind};
use crate::report::{ReviewReport, parse};
use crate::session::{DocumentSet, SessionStatus, SessionStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempts made per review unless the request says otherwise.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initializing,
    BuildingSession,
    Launching,
    Monitoring,
    Finalizing,
    Succeeded,
    Failed,
    Aborted,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::BuildingSession => "building session",
            Self::Launching => "launching",
            Self::Monitoring => "monitoring",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Receives state changes, e.g. to drive a progress display.
pub trait WorkflowObserver: Send + Sync {
    fn state_changed(&self, state: WorkflowState, attempt: u32);
}

/// One review to run.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub project_root: PathBuf,
    pub documents: DocumentSet,
    pub initiator: Option<String>,
    pub max_iterations: u32,
    /// Overrides the configured tool.
    pub tool: Option<String>,
}

impl ReviewRequest {
    pub fn new(project_root: impl Into<PathBuf>, documents: DocumentSet) -> Self {
        Self {
            project_root: project_root.into(),
            documents,
            initiator: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool: None,
        }
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// A review that reached a verdict, or at least produced an artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub report: ReviewReport,
    /// Artifact text exactly as the tool wrote it (decoded to UTF-8).
    pub raw_artifact: String,
    /// Set when the artifact could not be parsed; `report` is then a
    /// placeholder with status `unparsed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    /// Set when the tool was stopped by a timeout after it had already
    /// written an artifact; the report may be partial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<TimeoutKind>,
    pub tool: String,
    pub session_id: String,
    pub session_dir: PathBuf,
    pub artifact_path: PathBuf,
    pub attempts: u32,
    pub elapsed_secs: f64,
    pub log_tail: String,
}

impl ReviewOutcome {
    /// The judgment is unparsed or possibly incomplete.
    pub fn is_degraded(&self) -> bool {
        self.parse_error.is_some() || self.timed_out.is_some()
    }
}

/// Parse artifact text, falling back to an `unparsed` placeholder.
fn parse_artifact(raw_artifact: &str) -> (ReviewReport, Option<String>) {
    match parse(raw_artifact) {
        Ok(report) => (report, None),
        Err(e) => {
            warn!(error = %e, "Artifact could not be parsed, returning raw text");
            (ReviewReport::unparsed(), Some(e.to_string()))
        }
    }
}

/// Runs reviews: session, command, supervised process, parsed report.
pub struct WorkflowCoordinator {
    default_tool: String,
    registry: ToolRegistry,
    env: BTreeMap<String, String>,
    policy: MonitorPolicy,
    retain_sessions: usize,
    store: SessionStore,
    state: WorkflowState,
    history: Vec<WorkflowState>,
    observer: Option<Arc<dyn WorkflowObserver>>,
}

impl WorkflowCoordinator {
    pub fn new(config: &Config) -> Self {
        Self {
            default_tool: config.active_tool.clone(),
            registry: config.tools.clone(),
            env: config.env.clone(),
            policy: config.policy,
            retain_sessions: config.retain_sessions,
            store: SessionStore::new(&config.sessions_dir),
            state: WorkflowState::Initializing,
            history: Vec::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// States entered during the last run, in order.
    pub fn history(&self) -> &[WorkflowState] {
        &self.history
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    /// Run one review to completion.
    pub async fn run(
        &mut self,
        request: ReviewRequest,
        cancel: &CancellationToken,
    ) -> Result<ReviewOutcome, ReviewError> {
        self.history.clear();
        self.state = WorkflowState::Initializing;
        self.store.clear_active();
        let started = Instant::now();
        let result = self.drive(request, cancel, started).await;

        match &result {
            Ok(outcome) => {
                self.enter(WorkflowState::Succeeded, outcome.attempts);
                self.store.set_status(SessionStatus::Completed);
            }
            Err(ReviewError::Cancelled { .. }) => {
                self.enter(WorkflowState::Aborted, 0);
                self.store.set_status(SessionStatus::Aborted);
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Review failed");
                self.enter(WorkflowState::Failed, 0);
                self.store.set_status(SessionStatus::Failed);
            }
        }
        result
    }

    async fn drive(
        &mut self,
        request: ReviewRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ReviewOutcome, ReviewError> {
        self.enter(WorkflowState::Initializing, 0);
        if request.max_iterations == 0 {
            return Err(ReviewError::Validation(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        let tool_name = request
            .tool
            .clone()
            .unwrap_or_else(|| self.default_tool.clone());
        if self.registry.get(&tool_name).is_none() {
            return Err(ReviewError::Validation(format!(
                "Unknown review tool '{}' (available: {})",
                tool_name,
                self.registry.names().join(", ")
            )));
        }
        request.documents.validate()?;

        self.enter(WorkflowState::BuildingSession, 0);
        let session = self.store.create_session(&request.documents)?.clone();

        let context = PromptContext {
            initiator: request.initiator.clone(),
            has_requirement: session.requirement_document.is_some(),
            has_planning: session.planning_document.is_some(),
        };
        let prepared = CommandBuilder::new(&self.registry)
            .with_env(self.env.clone())
            .build(&tool_name, &request.project_root, &session.path, &context)?;
        self.store.set_status(SessionStatus::Reviewing);

        let mut pruned = false;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure_context = |log_tail: String| FailureContext {
                session_dir: Some(session.path.clone()),
                log_tail,
                artifact: None,
            };
            if cancel.is_cancelled() {
                return Err(ReviewError::Cancelled {
                    context: failure_context(String::new()),
                });
            }

            self.enter(WorkflowState::Launching, attempt);
            if attempt > 1 {
                // A partial artifact from the crashed attempt must not count
                match std::fs::remove_file(&prepared.artifact_path) {
                    Ok(()) => debug!("Removed stale artifact"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(error = %e, "Cannot remove stale artifact"),
                }
            }

            let mut supervisor = ProcessSupervisor::new().with_log_file(&prepared.log_path);
            if let Err(source) = supervisor.start(&prepared.spec) {
                let err = ReviewError::ToolLaunch {
                    tool: tool_name.clone(),
                    source,
                };
                if err.is_retryable() && attempt < request.max_iterations {
                    warn!(attempt, error = %err, "Transient launch failure, retrying");
                    continue;
                }
                return Err(err);
            }

            if !pruned {
                pruned = true;
                match self.store.prune(self.retain_sessions) {
                    Ok(report) => debug!(removed = report.removed.len(), "Session retention applied"),
                    Err(e) => warn!(error = %e, "Session pruning failed"),
                }
            }

            self.enter(WorkflowState::Monitoring, attempt);
            let outcome = ActivityMonitor::new(&mut supervisor, self.policy, &prepared.artifact_path)
                .run(cancel)
                .await;

            self.enter(WorkflowState::Finalizing, attempt);
            let finalized = |raw_artifact: String, timed_out: Option<TimeoutKind>, log_tail: String| {
                let (report, parse_error) = parse_artifact(&raw_artifact);
                info!(
                    status = %report.status,
                    p0 = report.issues.p0.len(),
                    p1 = report.issues.p1.len(),
                    p2 = report.issues.p2.len(),
                    attempts = attempt,
                    timed_out = ?timed_out,
                    "Review finished"
                );
                ReviewOutcome {
                    report,
                    raw_artifact,
                    parse_error,
                    timed_out,
                    tool: tool_name.clone(),
                    session_id: session.id.clone(),
                    session_dir: session.path.clone(),
                    artifact_path: prepared.artifact_path.clone(),
                    attempts: attempt,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    log_tail,
                }
            };
            match outcome.state {
                ProcessState::Completed => {
                    let raw_artifact = outcome.artifact.unwrap_or_default();
                    return Ok(finalized(raw_artifact, None, outcome.log_tail));
                }
                ProcessState::TimedOut => {
                    let kind = outcome.timeout.unwrap_or(TimeoutKind::Idle);
                    if let Some(raw_artifact) = outcome.artifact {
                        warn!(%kind, "Review tool timed out after writing the artifact, keeping it");
                        return Ok(finalized(raw_artifact, Some(kind), outcome.log_tail));
                    }
                    return Err(ReviewError::ProcessTimeout {
                        kind,
                        elapsed: outcome.elapsed,
                        context: failure_context(outcome.log_tail),
                    });
                }
                ProcessState::Cancelled => {
                    return Err(ReviewError::Cancelled {
                        context: FailureContext {
                            artifact: outcome.artifact,
                            ..failure_context(outcome.log_tail)
                        },
                    });
                }
                ProcessState::Crashed | ProcessState::Pending | ProcessState::Running => {
                    let err = ReviewError::ProcessCrash {
                        exit_code: outcome.exit_code,
                        attempts: attempt,
                        exhausted: attempt >= request.max_iterations,
                        context: failure_context(outcome.log_tail),
                    };
                    if err.is_retryable() {
                        warn!(
                            attempt,
                            max = request.max_iterations,
                            exit_code = ?outcome.exit_code,
                            "Review tool crashed, relaunching"
                        );
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn enter(&mut self, next: WorkflowState, attempt: u32) {
        if self.state.is_terminal() && !self.history.is_empty() {
            debug!(from = %self.state, to = %next, "Ignoring transition out of terminal state");
            return;
        }
        debug!(from = %self.state, to = %next, attempt, "Workflow state");
        self.state = next;
        self.history.push(next);
        if let Some(observer) = &self.observer {
            observer.state_changed(next, attempt);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::ToolProfile;
    use crate::errors::LaunchError;
    use crate::report::{Dimension, Grade, ReviewStatus, Severity};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const SCENARIO_REPORT: &str = "# Review Report\n## Status\nmajor_issues\n## Issues Found\n### P0 - Critical Issues\n- Null reference in handler\n### P1 - Major Issues\n- None\n### P2 - Minor Issues\n- None\n## Quality Rubric\n| Dimension | Score | Notes |\n|---|---|---|\n| Completeness | Pass | |\n| Correctness | Pass | |\n| Best Practices | Pass | |\n| Performance | Minor | extra allocation |\n| Maintainability | Pass | |\n| Security | Pass | |\n| Backward Compatibility | Pass | |\n## Summary\nOne blocker.\n<!-- REVIEW_COMPLETE -->\n";

    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let inputs = dir.path().join("inputs");
            std::fs::create_dir_all(&inputs).unwrap();
            std::fs::write(
                inputs.join("ReviewIndex-t1.md"),
                "| 1 | Task1_Login.md |\n| 2 | Task2_Cache.md |\n",
            )
            .unwrap();
            std::fs::write(inputs.join("Task1_Login-t1.md"), "# Login\n").unwrap();
            std::fs::write(inputs.join("Task2_Cache-t1.md"), "# Cache\n").unwrap();
            Self { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn documents(&self) -> DocumentSet {
            let inputs = self.root().join("inputs");
            DocumentSet::new(
                inputs.join("ReviewIndex-t1.md"),
                vec![
                    inputs.join("Task1_Login-t1.md"),
                    inputs.join("Task2_Cache-t1.md"),
                ],
            )
        }

        /// Write an executable fake review tool.
        fn tool(&self, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = self.root().join("fake-tool.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn config(&self, executable: &Path) -> Config {
            let mut profiles = BTreeMap::new();
            profiles.insert(
                "fake".to_string(),
                ToolProfile::new(executable.to_string_lossy()),
            );
            Config::for_project(self.root())
                .with_tools(ToolRegistry::from_profiles(profiles))
                .with_active_tool("fake")
                .with_policy(
                    MonitorPolicy::default()
                        .with_poll_interval(Duration::from_millis(50))
                        .with_idle_timeout(Duration::from_secs(20))
                        .with_absolute_timeout(Duration::from_secs(30))
                        .with_terminate_grace(Duration::from_millis(500))
                        .with_cancel_grace(Duration::from_millis(500))
                        .with_artifact_settle(Duration::from_millis(300)),
                )
        }

        fn session_dirs(&self) -> usize {
            std::fs::read_dir(self.root().join(".crossreview/sessions"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }

        fn counter(&self) -> usize {
            std::fs::read_to_string(self.root().join("attempts"))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }
    }

    /// Shell snippet writing `content` as the artifact of the newest session.
    fn write_report(content: &str) -> String {
        format!(
            "d=$(ls -d .crossreview/sessions/session-* | tail -1)\ncat > \"$d/report.md\" <<'EOF'\n{}EOF",
            content
        )
    }

    #[tokio::test]
    async fn test_successful_review_parses_report() {
        let project = Project::new();
        let tool = project.tool(&write_report(SCENARIO_REPORT));
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);

        let outcome = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.report.status, ReviewStatus::MajorIssues);
        assert_eq!(
            outcome.report.issues.descriptions(Severity::P0),
            vec!["Null reference in handler"]
        );
        let perf = outcome.report.dimension(Dimension::Performance);
        assert_eq!(perf.grade, Grade::Minor);
        assert_eq!(perf.note.as_deref(), Some("extra allocation"));
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.is_degraded());
        assert!(outcome.session_dir.join("Task1_Login.md").is_file());
        assert!(outcome.session_dir.join("fake.log").is_file());

        assert_eq!(
            coordinator.history(),
            &[
                WorkflowState::Initializing,
                WorkflowState::BuildingSession,
                WorkflowState::Launching,
                WorkflowState::Monitoring,
                WorkflowState::Finalizing,
                WorkflowState::Succeeded,
            ]
        );
        assert_eq!(
            coordinator.sessions().active().map(|s| s.status),
            Some(SessionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_missing_tool_fails_without_retry_or_prune() {
        let project = Project::new();
        let sessions = project.root().join(".crossreview/sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        for day in 1..=12 {
            std::fs::create_dir(sessions.join(format!(
                "session-202601{:02}-000000-000000-0000000{}",
                day,
                day % 10
            )))
            .unwrap();
        }
        let config = project.config(Path::new("/nonexistent/crossreview-fake-tool"));
        let mut coordinator = WorkflowCoordinator::new(&config);

        let err = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReviewError::ToolLaunch {
                source: LaunchError::NotFound { .. },
                ..
            }
        ));
        assert!(err.tool_never_ran());
        assert_eq!(project.session_dirs(), 13);
        assert_eq!(
            coordinator
                .history()
                .iter()
                .filter(|s| **s == WorkflowState::Launching)
                .count(),
            1
        );
        assert_eq!(coordinator.state(), WorkflowState::Failed);
    }

    #[tokio::test]
    async fn test_successful_launch_prunes_old_sessions() {
        let project = Project::new();
        let sessions = project.root().join(".crossreview/sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        for day in 1..=5 {
            std::fs::create_dir(sessions.join(format!(
                "session-202601{:02}-000000-000000-0000000{}",
                day, day
            )))
            .unwrap();
        }
        let tool = project.tool(&write_report(SCENARIO_REPORT));
        let config = project.config(&tool).with_retain_sessions(3);
        let mut coordinator = WorkflowCoordinator::new(&config);

        let outcome = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(project.session_dirs(), 3);
        assert!(outcome.session_dir.is_dir());
        assert!(sessions.join("session-20260105-000000-000000-00000005").is_dir());
        assert!(!sessions.join("session-20260101-000000-000000-00000001").exists());
    }

    #[tokio::test]
    async fn test_crash_retries_until_exhausted() {
        let project = Project::new();
        let tool = project.tool("echo run >> attempts\necho crashed >&2\nexit 1");
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);

        let err = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()).with_max_iterations(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match &err {
            ReviewError::ProcessCrash {
                attempts,
                exhausted,
                exit_code,
                context,
            } => {
                assert_eq!(*attempts, 3);
                assert!(*exhausted);
                assert_eq!(*exit_code, Some(1));
                assert!(context.log_tail.contains("crashed"));
                assert!(context.session_dir.is_some());
            }
            other => panic!("expected crash, got {:?}", other),
        }
        assert!(!err.is_retryable());
        assert_eq!(project.counter(), 3);
    }

    #[tokio::test]
    async fn test_crash_then_success() {
        let project = Project::new();
        let body = format!(
            "if [ ! -f attempts ]; then echo run > attempts; exit 2; fi\n{}",
            write_report(SCENARIO_REPORT)
        );
        let tool = project.tool(&body);
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);

        let outcome = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.report.status, ReviewStatus::MajorIssues);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let project = Project::new();
        let tool = project.tool("echo run >> attempts\nsleep 30");
        let mut config = project.config(&tool);
        config.policy = config.policy.with_idle_timeout(Duration::from_millis(300));
        let mut coordinator = WorkflowCoordinator::new(&config);

        let err = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReviewError::ProcessTimeout {
                kind: TimeoutKind::Idle,
                ..
            }
        ));
        assert_eq!(err.terminal_state(), Some(ProcessState::TimedOut));
        assert_eq!(project.counter(), 1);
    }

    #[tokio::test]
    async fn test_timeout_keeps_unparseable_partial_artifact() {
        let project = Project::new();
        let body = format!(
            "{}\nsleep 30",
            write_report("partial review: the handler leaks a file descriptor\n")
        );
        let tool = project.tool(&body);
        let mut config = project.config(&tool);
        config.policy = config.policy.with_idle_timeout(Duration::from_millis(800));
        let mut coordinator = WorkflowCoordinator::new(&config);

        let outcome = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.timed_out, Some(TimeoutKind::Idle));
        assert!(outcome.is_degraded());
        assert!(outcome.parse_error.is_some());
        assert_eq!(outcome.report.status, ReviewStatus::Unparsed);
        assert!(outcome.raw_artifact.contains("leaks a file descriptor"));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_keeps_parseable_partial_artifact() {
        let project = Project::new();
        let body = format!(
            "{}\nsleep 30",
            write_report("## Status\nminor_issues\n### P2 - Minor Issues\n- Rename `tmp`\n")
        );
        let tool = project.tool(&body);
        let mut config = project.config(&tool);
        config.policy = config
            .policy
            .with_idle_timeout(Duration::from_millis(500))
            .with_artifact_settle(Duration::from_secs(30));
        let mut coordinator = WorkflowCoordinator::new(&config);

        let outcome = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.timed_out, Some(TimeoutKind::Idle));
        assert!(outcome.is_degraded());
        assert!(outcome.parse_error.is_none());
        assert_eq!(outcome.report.status, ReviewStatus::MinorIssues);
        assert_eq!(
            outcome.report.issues.descriptions(Severity::P2),
            vec!["Rename `tmp`"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_carries_partial_artifact() {
        let project = Project::new();
        let body = format!("{}\nsleep 30", write_report("half a review\n"));
        let tool = project.tool(&body);
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = coordinator
            .run(ReviewRequest::new(project.root(), project.documents()), &cancel)
            .await
            .unwrap_err();

        let context = err.context().unwrap();
        assert!(matches!(err, ReviewError::Cancelled { .. }));
        assert_eq!(context.artifact.as_deref(), Some("half a review\n"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_review() {
        let project = Project::new();
        let tool = project.tool("sleep 30");
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let err = coordinator
            .run(ReviewRequest::new(project.root(), project.documents()), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::Cancelled { .. }));
        assert_eq!(coordinator.state(), WorkflowState::Aborted);
        assert_eq!(
            coordinator.sessions().active().map(|s| s.status),
            Some(SessionStatus::Aborted)
        );
    }

    #[tokio::test]
    async fn test_unparseable_artifact_is_degraded_result() {
        let project = Project::new();
        let tool = project.tool(&write_report("I gave up halfway.\n"));
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);

        let outcome = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.is_degraded());
        assert_eq!(outcome.report.status, ReviewStatus::Unparsed);
        assert_eq!(outcome.raw_artifact, "I gave up halfway.\n");
    }

    #[tokio::test]
    async fn test_index_mismatch_is_validation_error() {
        let project = Project::new();
        let tool = project.tool("exit 0");
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);
        let mut documents = project.documents();
        documents.tasks.reverse();

        let err = coordinator
            .run(
                ReviewRequest::new(project.root(), documents),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::Validation(_)));
        assert_eq!(project.session_dirs(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_validation_error() {
        let project = Project::new();
        let tool = project.tool("exit 0");
        let config = project.config(&tool);
        let mut coordinator = WorkflowCoordinator::new(&config);

        let err = coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()).with_tool("nope"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::Validation(_)));
        assert!(err.tool_never_ran());
    }

    #[tokio::test]
    async fn test_observer_sees_every_state() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(WorkflowState, u32)>>);
        impl WorkflowObserver for Recorder {
            fn state_changed(&self, state: WorkflowState, attempt: u32) {
                self.0.lock().unwrap().push((state, attempt));
            }
        }

        let project = Project::new();
        let tool = project.tool(&write_report(SCENARIO_REPORT));
        let config = project.config(&tool);
        let recorder = Arc::new(Recorder::default());
        let mut coordinator = WorkflowCoordinator::new(&config).with_observer(recorder.clone());

        coordinator
            .run(
                ReviewRequest::new(project.root(), project.documents()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let seen = recorder.0.lock().unwrap();
        assert!(seen.contains(&(WorkflowState::Monitoring, 1)));
        assert_eq!(seen.last(), Some(&(WorkflowState::Succeeded, 1)));
    }
}
