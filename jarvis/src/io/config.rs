//! Configuration stored under `.jarvis/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::write_atomic;

/// Jarvis configuration (TOML).
///
/// Edited by humans; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JarvisConfig {
    /// Upper bound on control-loop iterations per `run`.
    pub max_iterations: u32,

    /// Seconds to wait for a confirmation answer before applying the default.
    pub confirm_timeout_secs: u64,

    /// Run actions without asking for confirmation.
    pub continuous: bool,

    /// Answer used when the "run the action?" prompt times out.
    pub run_on_timeout: bool,

    /// Answer used when the "change the plan?" prompt times out.
    pub change_plan_on_timeout: bool,

    pub verbose: bool,

    /// Pause after a failed generation call before retrying.
    pub backoff_ms: u64,

    /// Byte budget for the rendered interpreter prompt.
    pub prompt_budget_bytes: usize,

    /// Directory (relative to `.jarvis/`) holding compiled task outcomes.
    pub outcomes_dir: String,

    /// Send every compiled document through a review call.
    pub review_compiled: bool,

    pub generator: GeneratorConfig,
    pub sandbox: SandboxConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and writes the response to stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter argv; the code file and its arguments are appended.
    pub interpreter: Vec<String>,
    pub default_timeout_secs: u64,
    /// Ceiling for timeouts requested by individual actions.
    pub max_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Empty means unconfigured.
    pub search_command: Vec<String>,
    /// Empty means unconfigured.
    pub extract_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for JarvisConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            confirm_timeout_secs: 30,
            continuous: false,
            run_on_timeout: true,
            change_plan_on_timeout: false,
            verbose: false,
            backoff_ms: 1000,
            prompt_budget_bytes: 40_000,
            outcomes_dir: "tasks".to_string(),
            review_compiled: true,
            generator: GeneratorConfig::default(),
            sandbox: SandboxConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            default_timeout_secs: 30,
            max_timeout_secs: 600,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_command: Vec::new(),
            extract_command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

fn non_empty_argv(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| !program.trim().is_empty())
}

impl JarvisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.outcomes_dir.trim().is_empty() {
            return Err(anyhow!("outcomes_dir must not be empty"));
        }
        if !non_empty_argv(&self.generator.command) {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if !non_empty_argv(&self.sandbox.interpreter) {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.default_timeout_secs == 0 {
            return Err(anyhow!("sandbox.default_timeout_secs must be > 0"));
        }
        if self.sandbox.max_timeout_secs < self.sandbox.default_timeout_secs {
            return Err(anyhow!(
                "sandbox.max_timeout_secs must be >= sandbox.default_timeout_secs"
            ));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.tools.timeout_secs == 0 {
            return Err(anyhow!("tools.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `JarvisConfig::default()`.
pub fn load_config(path: &Path) -> Result<JarvisConfig> {
    if !path.exists() {
        let cfg = JarvisConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: JarvisConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &JarvisConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
