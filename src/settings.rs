//! Layered configuration for crossreview.
//!
//! Settings are read from `config.toml` files and merged key by key:
//!
//! 1. built-in tool presets (iflow, codex, claude)
//! 2. user file, `<config dir>/crossreview/config.toml`
//! 3. project file, `<project>/.crossreview/config.toml`
//! 4. `CROSSREVIEW_TOOL` environment variable
//! 5. CLI flags (applied by the caller on the resolved value)
//!
//! # Configuration File Format
//!
//! ```toml
//! [review]
//! tool = "codex"
//! idle_timeout_secs = 300
//! absolute_timeout_secs = 3600
//! artifact_settle_secs = 10
//! retain_sessions = 10
//! max_iterations = 3
//!
//! [env]
//! HTTPS_PROXY = "http://proxy:3128"
//!
//! [tools.codex]
//! args = ["exec", "--skip-git-repo-check"]
//!
//! [tools.mytool]
//! executable = "/opt/mytool/bin/review"
//! prompt_delivery = "stdin"
//! log_file_name = "mytool.log"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::command::{ToolProfile, ToolRegistry, builtin_profiles};
use crate::process::MonitorPolicy;
use crate::session::DEFAULT_RETAIN_COUNT;
use crate::workflow::DEFAULT_MAX_ITERATIONS;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const PROJECT_DIR_NAME: &str = ".crossreview";
pub const TOOL_ENV_VAR: &str = "CROSSREVIEW_TOOL";

/// The `[review]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSection {
    /// Tool used when a review does not name one
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_absolute_timeout_secs")]
    pub absolute_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// How long an artifact without the completion marker must stay unchanged
    #[serde(default = "default_artifact_settle_secs")]
    pub artifact_settle_secs: u64,
    /// Session directories kept after pruning
    #[serde(default = "default_retain_sessions")]
    pub retain_sessions: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_tool() -> String {
    "iflow".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_absolute_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_terminate_grace_secs() -> u64 {
    3
}

fn default_cancel_grace_secs() -> u64 {
    2
}

fn default_artifact_settle_secs() -> u64 {
    10
}

fn default_retain_sessions() -> usize {
    DEFAULT_RETAIN_COUNT
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            idle_timeout_secs: default_idle_timeout_secs(),
            absolute_timeout_secs: default_absolute_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            terminate_grace_secs: default_terminate_grace_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            artifact_settle_secs: default_artifact_settle_secs(),
            retain_sessions: default_retain_sessions(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl ReviewSection {
    pub fn policy(&self) -> MonitorPolicy {
        MonitorPolicy::default()
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_absolute_timeout(Duration::from_secs(self.absolute_timeout_secs))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_terminate_grace(Duration::from_secs(self.terminate_grace_secs))
            .with_cancel_grace(Duration::from_secs(self.cancel_grace_secs))
            .with_artifact_settle(Duration::from_secs(self.artifact_settle_secs))
    }
}

/// The complete `config.toml` structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsToml {
    #[serde(default)]
    pub review: ReviewSection,
    /// Environment overrides applied to every tool
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Tool capability table
    #[serde(default)]
    pub tools: BTreeMap<String, ToolProfile>,
}

impl Default for SettingsToml {
    fn default() -> Self {
        Self {
            review: ReviewSection::default(),
            env: BTreeMap::new(),
            tools: builtin_profiles(),
        }
    }
}

impl SettingsToml {
    /// Parse one file on its own, without the built-in layer.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Merge TOML layers, lowest priority first, over the built-in presets.
    pub fn from_layers<'a>(layers: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut merged =
            toml::Value::try_from(Self::default()).context("Failed to encode built-in settings")?;
        for layer in layers {
            let value: toml::Table = toml::from_str(layer).context("Failed to parse config.toml")?;
            merge_values(&mut merged, toml::Value::Table(value));
        }
        merged
            .try_into()
            .context("Merged configuration is not valid")
    }

    /// Load built-ins, then each existing file in order.
    pub fn load_files(paths: &[PathBuf]) -> Result<Self> {
        let mut contents = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            contents.push(text);
        }
        Self::from_layers(contents.iter().map(String::as_str))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply the tool selected through the environment, if any.
    pub fn apply_env_override(&mut self, value: Option<String>) {
        if let Some(tool) = value.filter(|v| !v.trim().is_empty()) {
            self.review.tool = tool.trim().to_string();
        }
    }

    pub fn registry(&self) -> ToolRegistry {
        ToolRegistry::from_profiles(self.tools.clone())
    }

    /// Check the configuration.
    ///
    /// Returns the problems found; an empty list means the settings are usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.tools.contains_key(&self.review.tool) {
            problems.push(format!(
                "Active tool '{}' is not defined (available: {})",
                self.review.tool,
                self.tools.keys().cloned().collect::<Vec<_>>().join(", ")
            ));
        }

        let timings = [
            ("idle_timeout_secs", self.review.idle_timeout_secs),
            ("absolute_timeout_secs", self.review.absolute_timeout_secs),
            ("poll_interval_ms", self.review.poll_interval_ms),
        ];
        for (key, value) in timings {
            if value == 0 {
                problems.push(format!("[review] {} must be greater than zero", key));
            }
        }
        if self.review.max_iterations == 0 {
            problems.push("[review] max_iterations must be at least 1".to_string());
        }

        for (name, tool) in &self.tools {
            if tool.executable.trim().is_empty() {
                problems.push(format!("[tools.{}] executable is empty", name));
            }
            if !is_plain_file_name(&tool.artifact_name) {
                problems.push(format!(
                    "[tools.{}] artifact_name '{}' must be a file name inside the session directory",
                    name, tool.artifact_name
                ));
            }
            if let Some(ref log) = tool.log_file_name
                && !is_plain_file_name(log)
            {
                problems.push(format!(
                    "[tools.{}] log_file_name '{}' must be a file name inside the session directory",
                    name, log
                ));
            }
        }

        problems
    }
}

/// A single relative path component: no root, no `..`, no separators.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('\\')
}

/// Deep-merge `overlay` into `base`; tables merge key by key, anything
/// else is replaced.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Path of the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crossreview").join(CONFIG_FILE_NAME))
}

/// Path of the project-level config file.
pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Resolve settings for a project (built-ins → user → project → env).
pub fn load(project_dir: &Path) -> Result<SettingsToml> {
    let mut files = Vec::new();
    if let Some(user) = user_config_path() {
        files.push(user);
    }
    files.push(project_config_path(project_dir));

    let mut settings = SettingsToml::load_files(&files)?;
    settings.apply_env_override(std::env::var(TOOL_ENV_VAR).ok());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::PromptDelivery;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_include_builtin_tools() {
        let settings = SettingsToml::from_layers([]).unwrap();
        assert_eq!(settings.review.tool, "iflow");
        assert_eq!(settings.review.idle_timeout_secs, 300);
        assert_eq!(settings.review.retain_sessions, 10);
        assert!(settings.tools.contains_key("iflow"));
        assert!(settings.tools.contains_key("codex"));
        assert!(settings.tools.contains_key("claude"));
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn test_parse_single_file_has_no_builtins() {
        let settings = SettingsToml::parse("[review]\ntool = \"x\"\n").unwrap();
        assert!(settings.tools.is_empty());
        assert_eq!(settings.review.max_iterations, 3);
    }

    #[test]
    fn test_project_layer_overrides_one_tool_field() {
        let project = r#"
[tools.codex]
args = ["exec"]
"#;
        let settings = SettingsToml::from_layers([project]).unwrap();
        let codex = &settings.tools["codex"];
        assert_eq!(codex.args, vec!["exec"]);
        assert_eq!(codex.executable, "codex");
        assert_eq!(codex.log_file_name.as_deref(), Some("codex.log"));
    }

    #[test]
    fn test_later_layers_win() {
        let user = "[review]\ntool = \"codex\"\nidle_timeout_secs = 60\n";
        let project = "[review]\ntool = \"claude\"\n";
        let settings = SettingsToml::from_layers([user, project]).unwrap();
        assert_eq!(settings.review.tool, "claude");
        assert_eq!(settings.review.idle_timeout_secs, 60);
    }

    #[test]
    fn test_custom_tool_uses_field_defaults() {
        let project = r#"
[tools.mytool]
executable = "/opt/review"
prompt_delivery = "stdin"
"#;
        let settings = SettingsToml::from_layers([project]).unwrap();
        let tool = &settings.tools["mytool"];
        assert_eq!(tool.prompt_delivery, PromptDelivery::Stdin);
        assert_eq!(tool.artifact_name, "report.md");
        assert_eq!(tool.max_prompt_length, 800);
        assert!(settings.registry().get("mytool").is_some());
    }

    #[test]
    fn test_env_override_selects_tool() {
        let mut settings = SettingsToml::default();
        settings.apply_env_override(Some(" claude ".to_string()));
        assert_eq!(settings.review.tool, "claude");
        settings.apply_env_override(Some(String::new()));
        assert_eq!(settings.review.tool, "claude");
        settings.apply_env_override(None);
        assert_eq!(settings.review.tool, "claude");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let project = r#"
[review]
tool = "missing"
idle_timeout_secs = 0
max_iterations = 0

[tools.broken]
executable = ""
artifact_name = "../escape.md"
log_file_name = "/var/log/x.log"
"#;
        let settings = SettingsToml::from_layers([project]).unwrap();
        let problems = settings.validate();
        assert!(problems.iter().any(|p| p.contains("'missing'")));
        assert!(problems.iter().any(|p| p.contains("idle_timeout_secs")));
        assert!(problems.iter().any(|p| p.contains("max_iterations")));
        assert!(problems.iter().any(|p| p.contains("executable is empty")));
        assert!(problems.iter().any(|p| p.contains("../escape.md")));
        assert!(problems.iter().any(|p| p.contains("/var/log/x.log")));
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("report.md"));
        assert!(!is_plain_file_name("sub/report.md"));
        assert!(!is_plain_file_name("..\\report.md"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn test_policy_from_review_section() {
        let section = ReviewSection {
            idle_timeout_secs: 5,
            poll_interval_ms: 250,
            ..ReviewSection::default()
        };
        let policy = section.policy();
        assert_eq!(policy.idle_timeout, Duration::from_secs(5));
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.artifact_settle, Duration::from_secs(10));
    }

    #[test]
    fn test_load_files_skips_missing_and_round_trips_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".crossreview").join(CONFIG_FILE_NAME);
        let missing = dir.path().join("nope.toml");

        let mut settings = SettingsToml::default();
        settings.review.tool = "codex".to_string();
        settings.env.insert("FOO".to_string(), "bar".to_string());
        settings.save(&path).unwrap();

        let loaded = SettingsToml::load_files(&[missing, path]).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = SettingsToml::from_layers(["[review\n"]).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
