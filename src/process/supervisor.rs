use crate::command::CommandSpec;
use crate::encoding::decode_lossy;
use crate::errors::LaunchError;
use crate::process::{ProcessHandle, ProcessState};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// Number of trailing output lines kept for results and failures.
pub const LOG_TAIL_LINES: usize = 10;

/// How long to wait for the output readers after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the process after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Undecoded output is flushed to the log once it grows past this without a newline.
const MAX_PENDING_BYTES: usize = 64 * 1024;

const READ_BUFFER_SIZE: usize = 8192;

/// Owns the external process and the read end of its output pipes.
///
/// Output from stdout and stderr is pumped by two reader tasks into a
/// channel so that [`poll`](Self::poll) never blocks. Every chunk is decoded
/// and appended to the tool log (when configured) and to a short tail buffer.
pub struct ProcessSupervisor {
    state: ProcessState,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    output_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    io_tasks: Vec<JoinHandle<()>>,
    bytes_read: u64,
    exit_code: Option<i32>,
    exited: bool,
    terminated: bool,
    log_path: Option<PathBuf>,
    log_file: Option<File>,
    pending: Vec<u8>,
    tail: VecDeque<String>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            state: ProcessState::Pending,
            child: None,
            pid: None,
            started_at: None,
            output_rx: None,
            io_tasks: Vec::new(),
            bytes_read: 0,
            exit_code: None,
            exited: false,
            terminated: false,
            log_path: None,
            log_file: None,
            pending: Vec::new(),
            tail: VecDeque::with_capacity(LOG_TAIL_LINES),
        }
    }

    /// Mirror decoded output into this file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Spawn the process described by `spec`.
    ///
    /// The child gets its own process group so that [`terminate`](Self::terminate)
    /// reaches anything it spawns.
    pub fn start(&mut self, spec: &CommandSpec) -> Result<ProcessHandle, LaunchError> {
        if self.state != ProcessState::Pending {
            warn!(state = %self.state, "Supervisor already started, ignoring start");
            return Ok(self.handle());
        }

        if let Some(target) = spec.missing_shell_target() {
            return Err(LaunchError::NotFound {
                executable: target.to_string(),
                install_hint: spec.install_hint.clone(),
            });
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = %spec.display(), cwd = %spec.working_dir.display(), "Spawning review tool");
        let mut child = cmd.spawn().map_err(|e| {
            LaunchError::from_spawn(&spec.program, spec.install_hint.as_deref(), e)
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            self.io_tasks.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            self.io_tasks.push(spawn_reader(stderr, tx));
        }
        if let (Some(mut stdin), Some(prompt)) = (child.stdin.take(), spec.stdin.clone()) {
            self.io_tasks.push(tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "Failed to write prompt to stdin");
                }
                let _ = stdin.shutdown().await;
            }));
        }

        if let Some(path) = &self.log_path {
            match File::create(path) {
                Ok(file) => self.log_file = Some(file),
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot create tool log"),
            }
        }

        self.pid = child.id();
        self.started_at = Some(Instant::now());
        self.output_rx = Some(rx);
        self.child = Some(child);
        self.state = ProcessState::Running;
        info!(pid = ?self.pid, program = %spec.program, "Review tool started");

        Ok(self.handle())
    }

    /// Collect output produced since the last poll and report liveness.
    ///
    /// Never waits: output comes from the reader channel and liveness from
    /// a non-blocking `try_wait`.
    pub fn poll(&mut self) -> (Vec<u8>, bool) {
        let mut fresh = Vec::new();
        if let Some(rx) = self.output_rx.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                fresh.extend_from_slice(&chunk);
            }
        }
        self.record(&fresh);

        let alive = match self.child.as_mut() {
            Some(_) if self.exited => false,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    self.exited = true;
                    self.exit_code = status.code();
                    debug!(pid = ?self.pid, exit_code = ?self.exit_code, "Review tool exited");
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(pid = ?self.pid, error = %e, "Cannot query review tool status");
                    self.exited = true;
                    false
                }
            },
            None => false,
        };

        (fresh, alive)
    }

    /// Stop the process and everything it spawned.
    ///
    /// Sends a cooperative stop to the whole process group, waits up to
    /// `grace`, then kills. Calling it again, or on a process that was never
    /// started, does nothing.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.terminated {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };
        self.terminated = true;

        if self.exited {
            // Leader is gone; reap anything left in its group
            if let Some(pid) = self.pid {
                stop_tree(pid, Stop::Forced);
            }
        } else {
            if let Some(pid) = self.pid {
                info!(pid, grace_secs = grace.as_secs_f64(), "Terminating review tool");
                stop_tree(pid, Stop::Graceful);
            }
            match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    self.exit_code = status.code();
                    debug!(pid = ?self.pid, ?status, "Review tool exited after stop request");
                }
                Ok(Err(e)) => {
                    warn!(pid = ?self.pid, error = %e, "Error waiting for review tool to exit");
                }
                Err(_) => {
                    warn!(pid = ?self.pid, "Review tool ignored stop request, forcing kill");
                    if let Some(pid) = self.pid {
                        stop_tree(pid, Stop::Forced);
                    }
                    let _ = child.start_kill();
                    if let Ok(Ok(status)) = timeout(KILL_WAIT, child.wait()).await {
                        self.exit_code = status.code();
                    }
                }
            }
            self.exited = true;
        }

        self.drain().await;
    }

    /// Wait for the reader tasks to hit end-of-file and consume what they
    /// sent. Grandchildren that inherited the pipes can keep them open, so
    /// the wait is bounded.
    pub async fn drain(&mut self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        for mut task in std::mem::take(&mut self.io_tasks) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut task).await.is_err() {
                debug!("Output reader still open after drain timeout");
                task.abort();
            }
        }

        let mut rest = Vec::new();
        if let Some(rx) = self.output_rx.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                rest.extend_from_slice(&chunk);
            }
        }
        self.record(&rest);
        self.flush_pending();
    }

    /// Move to `next` unless a terminal state was already reached.
    /// Returns whether the transition happened.
    pub fn transition(&mut self, next: ProcessState) -> bool {
        if self.state.is_terminal() {
            debug!(from = %self.state, to = %next, "Ignoring transition out of terminal state");
            return false;
        }
        debug!(from = %self.state, to = %next, "Process state transition");
        self.state = next;
        true
    }

    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            pid: self.pid,
            started_at: self.started_at,
            bytes_read: self.bytes_read,
            state: self.state,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// The last [`LOG_TAIL_LINES`] lines of output.
    pub fn log_tail(&self) -> String {
        let mut lines: Vec<&str> = self.tail.iter().map(String::as_str).collect();
        let partial = decode_lossy(&self.pending);
        let partial = partial.trim_end();
        if !partial.is_empty() {
            lines.push(partial);
        }
        let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
        lines[skip..].join("\n")
    }

    fn record(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.bytes_read += bytes.len() as u64;
        self.pending.extend_from_slice(bytes);

        // Decode whole lines only so multi-byte characters are never split
        let cut = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None if self.pending.len() > MAX_PENDING_BYTES => self.pending.len(),
            None => return,
        };
        let complete: Vec<u8> = self.pending.drain(..cut).collect();
        self.write_decoded(&complete);
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.pending);
        self.write_decoded(&rest);
    }

    fn write_decoded(&mut self, bytes: &[u8]) {
        let text = decode_lossy(bytes);
        if let Some(file) = self.log_file.as_mut()
            && let Err(e) = file.write_all(text.as_bytes())
        {
            warn!(error = %e, "Failed to write tool log, disabling it");
            self.log_file = None;
        }
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if self.tail.len() == LOG_TAIL_LINES {
                self.tail.pop_front();
            }
            self.tail.push_back(line.to_string());
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // kill_on_drop only reaches the leader
        if self.child.is_some()
            && !self.terminated
            && let Some(pid) = self.pid
        {
            stop_tree(pid, Stop::Forced);
        }
    }
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Output reader stopped");
                    break;
                }
            }
        }
    })
}

#[derive(Debug, Clone, Copy)]
enum Stop {
    Graceful,
    Forced,
}

#[cfg(unix)]
fn stop_tree(pid: u32, stop: Stop) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let signal = match stop {
        Stop::Graceful => Signal::SIGTERM,
        Stop::Forced => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, ?signal, error = %e, "Failed to signal process group"),
    }
}

#[cfg(windows)]
fn stop_tree(pid: u32, stop: Stop) {
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/T"];
    if matches!(stop, Stop::Forced) {
        args.push("/F");
    }
    if let Err(e) = std::process::Command::new("taskkill")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        warn!(pid, error = %e, "Failed to run taskkill");
    }
}
