//! Web search and page extraction collaborators.
//!
//! Both are thin wrappers over configured commands. A tool with no command
//! configured fails every call with a readable error, which actions render as
//! output text.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument, warn};

use crate::io::config::ToolsConfig;
use crate::io::process::run_bounded;

const OUTPUT_LIMIT_BYTES: usize = 200_000;

pub trait WebSearch {
    /// Search results as text, typically one URL per line.
    fn search(&self, query: &str) -> Result<String>;
}

pub trait Extractor {
    /// Information extracted from `url` following `instructions`.
    fn extract(&self, url: &str, instructions: &str) -> Result<String>;
}

/// Search and extraction backed by external commands.
///
/// The query (or the url followed by the instructions) is appended to the
/// configured argv.
pub struct CommandTool {
    search_command: Vec<String>,
    extract_command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(config: &ToolsConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            search_command: config.search_command.clone(),
            extract_command: config.extract_command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn run(&self, label: &str, argv: &[String], extra: &[&str]) -> Result<String> {
        let Some((program, args)) = argv.split_first() else {
            bail!("{label} tool is not configured (set tools.{label}_command in config.toml)");
        };
        info!(tool = label, program = %program, "invoking tool");
        let mut cmd = Command::new(program);
        cmd.args(args).args(extra).current_dir(&self.workdir);
        let output = run_bounded(cmd, None, self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run {label} command"))?;
        if output.timed_out {
            warn!(tool = label, "tool timed out");
            return Err(anyhow!(
                "{label} timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "{label} exited with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        Ok(output.stdout_text().trim_end().to_string())
    }
}

impl WebSearch for CommandTool {
    #[instrument(skip_all)]
    fn search(&self, query: &str) -> Result<String> {
        self.run("search", &self.search_command, &[query])
    }
}

impl Extractor for CommandTool {
    #[instrument(skip_all, fields(url = %url))]
    fn extract(&self, url: &str, instructions: &str) -> Result<String> {
        self.run("extract", &self.extract_command, &[url, instructions])
    }
}
