//! Compiled task outcomes, one YAML document per task (`.jarvis/tasks/<n>.yaml`).
//!
//! Files hold the generator's response byte-for-byte. Decoding strips an
//! optional ```` ```yaml ```` fence and validates the document against the
//! embedded JSON Schema before anything is persisted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::JarvisError;
use crate::io::write_atomic;
use crate::plan::{TaskDocument, TaskOutcome};

const OUTCOME_SCHEMA: &str = include_str!("../../schemas/task_outcome.schema.json");

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

/// Body of a fenced document, or the whole text when unfenced.
pub fn strip_fences(raw: &str) -> &str {
    FENCED_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str())
}

/// Decode and validate a generator response into a task outcome.
///
/// Any failure is a `JarvisError::Parse`.
pub fn decode_outcome(raw: &str) -> Result<TaskOutcome, JarvisError> {
    let body = strip_fences(raw);
    let value: Value = serde_yaml::from_str(body)
        .map_err(|err| JarvisError::parse(format!("task outcome is not valid YAML: {err}")))?;
    validate_outcome_value(&value).map_err(|err| JarvisError::parse(format!("{err:#}")))?;
    let doc: TaskDocument = serde_json::from_value(value)
        .map_err(|err| JarvisError::parse(format!("task outcome shape: {err}")))?;
    Ok(TaskOutcome {
        task_num: doc.task_num,
        task_description: doc.task,
        overall_outcome: doc.overall_outcome,
        instructions: doc.instructions,
        raw_instructions: raw.to_string(),
    })
}

fn validate_outcome_value(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(OUTCOME_SCHEMA).context("parse outcome schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "task outcome failed schema validation: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Directory of persisted outcomes keyed by task number.
#[derive(Debug, Clone)]
pub struct OutcomeStore {
    dir: PathBuf,
}

impl OutcomeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, task_num: i64) -> PathBuf {
        self.dir.join(format!("{task_num}.yaml"))
    }

    /// Raw persisted bytes, if the task was compiled before.
    pub fn load_raw(&self, task_num: i64) -> Result<Option<String>> {
        let path = self.path(task_num);
        if !path.exists() {
            return Ok(None);
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("read outcome {}", path.display()))?;
        Ok(Some(raw))
    }

    #[instrument(skip_all, fields(task_num = task_num))]
    pub fn load(&self, task_num: i64) -> Result<Option<TaskOutcome>> {
        let Some(raw) = self.load_raw(task_num)? else {
            return Ok(None);
        };
        let outcome = decode_outcome(&raw)
            .with_context(|| format!("decode outcome {}", self.path(task_num).display()))?;
        debug!(instructions = outcome.instructions.len(), "outcome loaded");
        Ok(Some(outcome))
    }

    /// Atomically replace the task's file with `raw` (temp file + rename).
    #[instrument(skip_all, fields(task_num = task_num, bytes = raw.len()))]
    pub fn write_raw(&self, task_num: i64, raw: &str) -> Result<()> {
        write_atomic(&self.path(task_num), raw.as_bytes())?;
        debug!("outcome written");
        Ok(())
    }
}
