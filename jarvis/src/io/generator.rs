//! Generator abstraction for language-model calls.
//!
//! The [`Generator`] trait decouples compilation, branch decisions and the
//! control loop from the model backend. [`CommandGenerator`] pipes the prompt
//! into a configured command; tests use scripted generators instead.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::error::JarvisError;
use crate::io::config::GeneratorConfig;
use crate::io::process::run_bounded;

/// What a generation call is for. Adapters may route purposes differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationPurpose {
    /// Compile one task into an instruction document.
    Compile,
    /// Approve a compiled document or return a corrected one.
    Review,
    /// Answer a branch condition with `{"result": bool, "reason": text}`.
    Branch,
    /// Free-form completion requested by a `TextCompletion` action.
    Completion,
    /// Next action for the interactive control loop.
    Interpret,
    /// Rewrite the goal after the user asked for a plan change.
    ReviseGoal,
}

impl GenerationPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationPurpose::Compile => "compile",
            GenerationPurpose::Review => "review",
            GenerationPurpose::Branch => "branch",
            GenerationPurpose::Completion => "completion",
            GenerationPurpose::Interpret => "interpret",
            GenerationPurpose::ReviseGoal => "revise_goal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub purpose: GenerationPurpose,
    pub prompt: String,
}

impl GenerateRequest {
    pub fn new(purpose: GenerationPurpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
        }
    }
}

/// Abstraction over model backends. Failures are `JarvisError::Generation`.
pub trait Generator {
    fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

/// Generator that spawns a command, writes the prompt to stdin and reads the
/// response from stdout. The purpose is exported as `JARVIS_PURPOSE`.
pub struct CommandGenerator {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(purpose = request.purpose.as_str(), prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| JarvisError::generation("generator.command is empty"))?;
        info!(program = %program, "invoking generator");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("JARVIS_PURPOSE", request.purpose.as_str())
            .current_dir(&self.workdir);

        let output = run_bounded(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| JarvisError::generation(format!("{err:#}")))
        .context("run generator command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
            return Err(JarvisError::generation(format!(
                "generator timed out after {}s",
                self.timeout.as_secs()
            ))
            .into());
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(JarvisError::generation(format!(
                "generator exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ))
            .into());
        }

        let response = output.stdout_text();
        if response.trim().is_empty() {
            return Err(JarvisError::generation("generator returned an empty response").into());
        }
        debug!(response_bytes = response.len(), "generator responded");
        Ok(response)
    }
}
