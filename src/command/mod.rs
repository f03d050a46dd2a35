//! Review tool invocation.
//!
//! The capability table maps a tool name to a [`ToolProfile`]: executable,
//! fixed arguments, artifact and log file names. Each entry becomes a
//! [`ReviewTool`] in a [`ToolRegistry`]; [`CommandBuilder`] looks the tool up
//! by name and assembles an immutable [`CommandSpec`] for one review.
//!
//! ## Example
//!
//! ```
//! use crossreview::command::{CommandBuilder, PromptContext, ToolRegistry};
//! use std::path::Path;
//!
//! let registry = ToolRegistry::builtin();
//! let builder = CommandBuilder::new(&registry);
//! let prepared = builder
//!     .build(
//!         "codex",
//!         Path::new("/work/app"),
//!         Path::new("/work/app/.crossreview/sessions/session-1"),
//!         &PromptContext::default(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(prepared.spec.working_dir, Path::new("/work/app"));
//! assert!(prepared.prompt.contains(".crossreview/sessions/session-1/ReviewIndex.md"));
//! ```

pub mod probe;

use crate::errors::ReviewError;
use crate::report::COMPLETION_MARKER;
use crate::session::{INDEX_FILE_NAME, PLANNING_FILE_NAME, REQUIREMENT_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default artifact file name written by the review tool.
pub const DEFAULT_ARTIFACT_NAME: &str = "report.md";

/// Prompts longer than this draw a warning; some tools truncate long arguments.
pub const DEFAULT_MAX_PROMPT_LENGTH: usize = 800;

/// Extensions tried on `PATH` lookups when `PATHEXT` is unset.
const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// Environment forced on every tool so Python-based CLIs read and write UTF-8.
pub const UTF8_ENV: &[(&str, &str)] = &[("PYTHONIOENCODING", "utf-8"), ("PYTHONUTF8", "1")];

/// Fully resolved invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Project root; never the session directory.
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Text written to the child's stdin, when the tool takes the prompt there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Shown when the program cannot be found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
    /// Program run through the shell wrapper, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_target: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            stdin: None,
            install_hint: None,
            shell_target: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in env {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_install_hint(mut self, hint: impl Into<String>) -> Self {
        self.install_hint = Some(hint.into());
        self
    }

    /// Route the call through `cmd.exe /c` so npm `.cmd` shims resolve.
    pub fn wrapped_in_cmd_shell(mut self) -> Self {
        let target = std::mem::take(&mut self.program);
        let mut args = vec!["/c".to_string(), target.clone()];
        args.append(&mut self.args);
        self.program = "cmd.exe".to_string();
        self.args = args;
        self.shell_target = Some(target);
        self
    }

    /// The wrapped program of a shell-wrapped spec, when it cannot be found
    /// on `PATH`. `cmd.exe` starts even when the tool does not exist.
    pub fn missing_shell_target(&self) -> Option<&str> {
        let target = self.shell_target.as_deref()?;
        let path_var = self
            .env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"));
        let extensions = path_extensions(std::env::var_os("PATHEXT").as_deref());
        match find_executable(target, &self.working_dir, path_var.as_deref(), &extensions) {
            Some(_) => None,
            None => Some(target),
        }
    }

    /// Shell-like rendering for logs. Long arguments are shortened.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            let shown = if arg.chars().count() > 60 {
                format!("{}...", arg.chars().take(57).collect::<String>())
            } else {
                arg.clone()
            };
            if shown.contains(char::is_whitespace) {
                parts.push(format!("\"{}\"", shown));
            } else {
                parts.push(shown);
            }
        }
        parts.join(" ")
    }
}

/// How the prompt reaches the tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptDelivery {
    /// Appended as the last command-line argument.
    #[default]
    Argument,
    /// Written to the child's stdin, which is then closed.
    Stdin,
}

/// One entry of the tool capability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProfile {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Defaults to `<tool name>.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_name: Option<String>,
    #[serde(default)]
    pub prompt_delivery: PromptDelivery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_artifact_name() -> String {
    DEFAULT_ARTIFACT_NAME.to_string()
}

fn default_max_prompt_length() -> usize {
    DEFAULT_MAX_PROMPT_LENGTH
}

impl ToolProfile {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            artifact_name: default_artifact_name(),
            log_file_name: None,
            prompt_delivery: PromptDelivery::default(),
            extended_prompt: None,
            install_command: None,
            max_prompt_length: default_max_prompt_length(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_file_name(mut self, name: impl Into<String>) -> Self {
        self.log_file_name = Some(name.into());
        self
    }

    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    pub fn with_extended_prompt(mut self, text: impl Into<String>) -> Self {
        self.extended_prompt = Some(text.into());
        self
    }

    pub fn with_install_command(mut self, command: impl Into<String>) -> Self {
        self.install_command = Some(command.into());
        self
    }

    pub fn with_prompt_delivery(mut self, delivery: PromptDelivery) -> Self {
        self.prompt_delivery = delivery;
        self
    }
}

/// The tools crossreview knows out of the box.
pub fn builtin_profiles() -> BTreeMap<String, ToolProfile> {
    let mut tools = BTreeMap::new();
    tools.insert(
        "iflow".to_string(),
        ToolProfile::new("iflow")
            .with_args(["-y", "-p"])
            .with_log_file_name("iflow.log")
            .with_install_command("npm i -g @iflow-ai/iflow-cli"),
    );
    tools.insert(
        "codex".to_string(),
        ToolProfile::new("codex")
            .with_args([
                "exec",
                "--skip-git-repo-check",
                "--dangerously-bypass-approvals-and-sandbox",
            ])
            .with_log_file_name("codex.log")
            .with_install_command("npm install -g @openai/codex"),
    );
    tools.insert(
        "claude".to_string(),
        ToolProfile::new("claude")
            .with_args(["--dangerously-skip-permissions"])
            .with_log_file_name("claude.log")
            .with_extended_prompt("Please use ultrathink mode for deep analysis")
            .with_install_command("npm install -g @anthropic-ai/claude-code"),
    );
    tools
}

/// Capability of an external review tool.
pub trait ReviewTool: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn executable(&self) -> &str;

    /// File the tool writes its verdict to, inside the session directory.
    fn artifact_name(&self) -> &str;

    /// File the tool's captured output is written to, inside the session directory.
    fn log_file_name(&self) -> &str;

    fn install_hint(&self) -> Option<&str>;

    /// Extra instruction appended to the prompt for this tool.
    fn extended_prompt(&self) -> Option<&str> {
        None
    }

    fn max_prompt_length(&self) -> usize {
        DEFAULT_MAX_PROMPT_LENGTH
    }

    /// Build the invocation for one review.
    fn command_spec(&self, working_dir: &Path, prompt: &str) -> CommandSpec;
}

/// A [`ReviewTool`] backed by a [`ToolProfile`] from the capability table.
#[derive(Debug, Clone)]
pub struct ConfiguredTool {
    name: String,
    log_file_name: String,
    profile: ToolProfile,
}

impl ConfiguredTool {
    pub fn new(name: impl Into<String>, profile: ToolProfile) -> Self {
        let name = name.into();
        let log_file_name = profile
            .log_file_name
            .clone()
            .unwrap_or_else(|| format!("{}.log", name));
        Self {
            name,
            log_file_name,
            profile,
        }
    }

    pub fn profile(&self) -> &ToolProfile {
        &self.profile
    }
}

impl ReviewTool for ConfiguredTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn executable(&self) -> &str {
        &self.profile.executable
    }

    fn artifact_name(&self) -> &str {
        &self.profile.artifact_name
    }

    fn log_file_name(&self) -> &str {
        &self.log_file_name
    }

    fn install_hint(&self) -> Option<&str> {
        self.profile.install_command.as_deref()
    }

    fn extended_prompt(&self) -> Option<&str> {
        self.profile
            .extended_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn max_prompt_length(&self) -> usize {
        self.profile.max_prompt_length
    }

    fn command_spec(&self, working_dir: &Path, prompt: &str) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.profile.executable, working_dir)
            .with_args(self.profile.args.iter().cloned());
        match self.profile.prompt_delivery {
            PromptDelivery::Argument => spec.args.push(prompt.to_string()),
            PromptDelivery::Stdin => spec.stdin = Some(prompt.to_string()),
        }
        spec = spec.with_env(self.profile.env.clone());
        if let Some(hint) = &self.profile.install_command {
            spec = spec.with_install_hint(hint);
        }
        spec
    }
}

/// Tools selectable by name. Built once from configuration and read-only
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ReviewTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the built-in presets.
    pub fn builtin() -> Self {
        Self::from_profiles(builtin_profiles())
    }

    pub fn from_profiles(profiles: BTreeMap<String, ToolProfile>) -> Self {
        let mut registry = Self::new();
        for (name, profile) in profiles {
            registry.register(Arc::new(ConfiguredTool::new(name, profile)));
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn ReviewTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ReviewTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ReviewTool>> {
        self.tools.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Per-review facts that go into the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub initiator: Option<String>,
    pub has_requirement: bool,
    pub has_planning: bool,
}

/// Everything needed to launch and then finalize one review attempt.
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    pub tool: Arc<dyn ReviewTool>,
    pub spec: CommandSpec,
    pub prompt: String,
    pub artifact_path: PathBuf,
    pub log_path: PathBuf,
}

/// Resolves a tool by name and assembles its invocation.
pub struct CommandBuilder<'a> {
    registry: &'a ToolRegistry,
    env: BTreeMap<String, String>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self {
            registry,
            env: BTreeMap::new(),
        }
    }

    /// Environment overrides applied to every tool, below the tool's own `env`.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn build(
        &self,
        tool_name: &str,
        project_root: &Path,
        session_dir: &Path,
        context: &PromptContext,
    ) -> Result<PreparedCommand, ReviewError> {
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            ReviewError::Validation(format!(
                "Unknown review tool '{}' (available: {})",
                tool_name,
                self.registry.names().join(", ")
            ))
        })?;

        let session_rel = relative_posix(project_root, session_dir);
        let prompt = build_prompt(tool.as_ref(), &session_rel, context);
        if prompt.chars().count() > tool.max_prompt_length() {
            warn!(
                tool = tool_name,
                length = prompt.chars().count(),
                limit = tool.max_prompt_length(),
                "Prompt exceeds recommended length"
            );
        }

        let mut spec = tool.command_spec(project_root, &prompt);
        let tool_env = std::mem::take(&mut spec.env);
        spec = spec
            .with_env(self.env.clone())
            .with_env(tool_env)
            .with_env(UTF8_ENV.iter().copied());
        if cfg!(windows) {
            spec = spec.wrapped_in_cmd_shell();
        }
        debug!(tool = tool_name, command = %spec.display(), "Built review command");

        Ok(PreparedCommand {
            artifact_path: session_dir.join(tool.artifact_name()),
            log_path: session_dir.join(tool.log_file_name()),
            tool,
            spec,
            prompt,
        })
    }
}

/// Split a `PATHEXT` value into extensions, falling back to the Windows default.
pub fn path_extensions(pathext: Option<&OsStr>) -> Vec<String> {
    pathext
        .and_then(OsStr::to_str)
        .unwrap_or(DEFAULT_PATHEXT)
        .split(';')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
        .collect()
}

/// Locate `program` the way a shell does: relative to `working_dir` when it
/// names a path, otherwise in each `path_var` entry. Each candidate is tried
/// as is and with every extension appended.
pub fn find_executable(
    program: &str,
    working_dir: &Path,
    path_var: Option<&OsStr>,
    extensions: &[String],
) -> Option<PathBuf> {
    let existing = |base: PathBuf| -> Option<PathBuf> {
        if base.is_file() {
            return Some(base);
        }
        extensions
            .iter()
            .flat_map(|ext| [ext.clone(), ext.to_lowercase()])
            .map(|ext| {
                let mut name = base.clone().into_os_string();
                name.push(ext);
                PathBuf::from(name)
            })
            .find(|candidate| candidate.is_file())
    };

    if program.contains(['/', '\\']) {
        return existing(working_dir.join(program));
    }
    std::env::split_paths(path_var?).find_map(|dir| existing(dir.join(program)))
}

/// The review instruction handed to the tool.
pub fn build_prompt(tool: &dyn ReviewTool, session_rel: &str, context: &PromptContext) -> String {
    let mut prompt = format!(
        "Read {dir}/{index} for the review index. It lists the task documents in {dir}/ in review order. \
         Review every task document against the index",
        dir = session_rel,
        index = INDEX_FILE_NAME,
    );
    match (context.has_requirement, context.has_planning) {
        (true, true) => prompt.push_str(&format!(
            ", the original requirement in {}/{} and the task planning in {}/{}",
            session_rel, REQUIREMENT_FILE_NAME, session_rel, PLANNING_FILE_NAME
        )),
        (true, false) => prompt.push_str(&format!(
            " and the original requirement in {}/{}",
            session_rel, REQUIREMENT_FILE_NAME
        )),
        (false, true) => prompt.push_str(&format!(
            " and the task planning in {}/{}",
            session_rel, PLANNING_FILE_NAME
        )),
        (false, false) => {}
    }
    prompt.push_str(&format!(
        ", then write the review report to {}/{}. \
         Use UTF-8 without a byte order mark for every file you read or write. \
         End the report with the line {}",
        session_rel,
        tool.artifact_name(),
        COMPLETION_MARKER
    ));
    if let Some(initiator) = context.initiator.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("\nRequested by: {}", initiator.trim()));
    }
    if let Some(extra) = tool.extended_prompt() {
        prompt.push_str(&format!("\n\nIMPORTANT: {}", extra));
    }
    prompt
}

/// `path` relative to `base` with forward slashes; the full path when it is
/// not under `base`.
pub fn relative_posix(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}
