//! Availability check for review tools: run `<executable> --version`.

use super::{CommandSpec, ReviewTool};
use crate::encoding::decode_lossy;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeResult {
    /// The tool answered; first non-empty output line, if any.
    Available { version: Option<String> },
    /// Started but exited unsuccessfully.
    Failed { exit_code: Option<i32> },
    NotFound,
    TimedOut,
    /// Could not be started for another reason.
    Error { message: String },
}

impl ProbeResult {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Probe a tool with `--version`, giving up after `timeout`.
pub async fn probe_tool(tool: &dyn ReviewTool, timeout: Duration) -> ProbeResult {
    let mut spec = CommandSpec::new(tool.executable(), ".").with_args(["--version"]);
    if cfg!(windows) {
        spec = spec.wrapped_in_cmd_shell();
    }
    debug!(tool = tool.name(), command = %spec.display(), "Probing review tool");
    if spec.missing_shell_target().is_some() {
        return ProbeResult::NotFound;
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => return ProbeResult::TimedOut,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => return ProbeResult::NotFound,
        Ok(Err(e)) => {
            return ProbeResult::Error {
                message: e.to_string(),
            };
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return ProbeResult::Failed {
            exit_code: output.status.code(),
        };
    }
    let stdout = decode_lossy(&output.stdout);
    let stderr = decode_lossy(&output.stderr);
    let version = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string);
    ProbeResult::Available { version }
}
