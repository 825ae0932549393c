//! Code execution collaborator.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::io::config::SandboxConfig;
use crate::io::process::run_bounded;

#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Directory the code file lives in and the process runs from.
    pub workdir: PathBuf,
    /// Relative file name; written first when `code` is set.
    pub file_name: String,
    pub code: Option<String>,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutput {
    /// Combined stdout and stderr.
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub timeout: Duration,
}

impl SandboxOutput {
    /// Output text with its `[exit code: N]` or `[timed out after Ns]` marker.
    pub fn render(&self) -> String {
        let marker = if self.timed_out {
            format!("[timed out after {}s]", self.timeout.as_secs())
        } else {
            match self.exit_code {
                Some(code) => format!("[exit code: {code}]"),
                None => "[exit code: signal]".to_string(),
            }
        };
        if self.output.is_empty() {
            marker
        } else if self.output.ends_with('\n') {
            format!("{}{marker}", self.output)
        } else {
            format!("{}\n{marker}", self.output)
        }
    }
}

pub trait Sandbox {
    /// Run the request once. Errors are setup failures (bad path, spawn);
    /// a non-zero exit or timeout is reported in the output instead.
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxOutput>;
}

/// Runs code with a configured interpreter as a child process.
pub struct ProcessSandbox {
    interpreter: Vec<String>,
    output_limit_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(skip_all, fields(file = %request.file_name, timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxOutput> {
        let relative = checked_relative(&request.file_name)?;
        let script = request.workdir.join(relative);
        if let Some(code) = &request.code {
            if let Some(parent) = script.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
            fs::write(&script, code).with_context(|| format!("write {}", script.display()))?;
        }
        if !script.is_file() {
            bail!("code file {} does not exist", request.file_name);
        }

        let (program, interpreter_args) = self
            .interpreter
            .split_first()
            .context("sandbox.interpreter is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(interpreter_args)
            .arg(relative)
            .args(&request.args)
            .current_dir(&request.workdir);

        info!(program = %program, "executing code");
        let output = run_bounded(cmd, None, request.timeout, self.output_limit_bytes)
            .context("run interpreter")?;
        if output.timed_out {
            warn!("code execution timed out");
        }
        Ok(SandboxOutput {
            output: output.combined_text(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            timeout: request.timeout,
        })
    }
}

fn checked_relative(file_name: &str) -> Result<&Path> {
    let path = Path::new(file_name);
    if path.as_os_str().is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("code file '{file_name}' must be a relative path inside the workspace");
    }
    Ok(path)
}
