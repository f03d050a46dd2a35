use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::command::ToolRegistry;
use crate::process::MonitorPolicy;
use crate::session::DEFAULT_RETAIN_COUNT;
use crate::settings::{self, PROJECT_DIR_NAME, SettingsToml};
use crate::workflow::DEFAULT_MAX_ITERATIONS;

/// Runtime configuration for crossreview.
///
/// Resolved once from the layered [`SettingsToml`] plus CLI overrides and
/// passed explicitly to whatever needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub active_tool: String,
    pub tools: ToolRegistry,
    /// Environment overrides applied to every tool
    pub env: BTreeMap<String, String>,
    pub policy: MonitorPolicy,
    pub retain_sessions: usize,
    pub max_iterations: u32,
    pub verbose: bool,
}

/// Values given on the command line; they take precedence over every file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub tool: Option<String>,
    pub max_iterations: Option<u32>,
    pub verbose: bool,
}

impl Config {
    /// Load configuration for a project directory.
    pub fn new(project_dir: &Path, overrides: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let settings = settings::load(&project_dir)?;
        Self::from_settings(project_dir, &settings, overrides)
    }

    /// Build a runtime configuration from already-loaded settings.
    pub fn from_settings(
        project_dir: PathBuf,
        settings: &SettingsToml,
        overrides: CliOverrides,
    ) -> Result<Self> {
        let problems = settings.validate();
        let mut config = Self::for_project(&project_dir);
        config.tools = settings.registry();
        config.env = settings.env.clone();
        config.policy = settings.review.policy();
        config.retain_sessions = settings.review.retain_sessions;
        config.max_iterations = overrides
            .max_iterations
            .unwrap_or(settings.review.max_iterations);
        config.active_tool = overrides
            .tool
            .unwrap_or_else(|| settings.review.tool.clone());
        config.verbose = overrides.verbose;

        // An unknown configured tool is fine when the CLI picks a valid one
        let blocking: Vec<&String> = problems
            .iter()
            .filter(|p| !(p.starts_with("Active tool") && config.tools.get(&config.active_tool).is_some()))
            .collect();
        if !blocking.is_empty() {
            bail!(
                "Invalid configuration:\n  - {}",
                blocking
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join("\n  - ")
            );
        }
        if config.tools.get(&config.active_tool).is_none() {
            bail!(
                "Unknown review tool '{}' (available: {})",
                config.active_tool,
                config.tools.names().join(", ")
            );
        }
        Ok(config)
    }

    /// Defaults for a project directory, without reading any file.
    pub fn for_project(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            sessions_dir: project_dir.join(PROJECT_DIR_NAME).join("sessions"),
            active_tool: "iflow".to_string(),
            tools: ToolRegistry::builtin(),
            env: BTreeMap::new(),
            policy: MonitorPolicy::default(),
            retain_sessions: DEFAULT_RETAIN_COUNT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            verbose: false,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_active_tool(mut self, tool: impl Into<String>) -> Self {
        self.active_tool = tool.into();
        self
    }

    pub fn with_policy(mut self, policy: MonitorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retain_sessions(mut self, retain: usize) -> Self {
        self.retain_sessions = retain;
        self
    }
}
