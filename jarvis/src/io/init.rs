//! Initialization helpers for `.jarvis/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::checkpoint::CheckpointStore;
use super::config::{JarvisConfig, write_config};
use super::variable_store::save_variables;
use crate::core::variables::VariableStore;

/// All canonical paths within `.jarvis/` for a project root.
#[derive(Debug, Clone)]
pub struct JarvisPaths {
    pub root: PathBuf,
    pub jarvis_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub variables_path: PathBuf,
    /// Directory file actions and code execution are confined to.
    pub workspace_dir: PathBuf,
}

impl JarvisPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let jarvis_dir = root.join(".jarvis");
        Self {
            root: root.clone(),
            jarvis_dir: jarvis_dir.clone(),
            gitignore_path: jarvis_dir.join(".gitignore"),
            config_path: jarvis_dir.join("config.toml"),
            plan_path: jarvis_dir.join("plan.yaml"),
            checkpoint_path: jarvis_dir.join("checkpoint.db"),
            variables_path: jarvis_dir.join("variables.json"),
            workspace_dir: jarvis_dir.join("workspace"),
        }
    }

    /// Outcome directory named by the config, relative to `.jarvis/`.
    pub fn outcomes_dir(&self, config: &JarvisConfig) -> PathBuf {
        self.jarvis_dir.join(&config.outcomes_dir)
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.jarvis_dir.is_dir() {
            return Err(anyhow!(
                "{} is not initialized (run `jarvis init`)",
                self.root.display()
            ));
        }
        Ok(())
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing jarvis-owned files.
    pub force: bool,
}

/// Create `.jarvis/` scaffolding in `root`.
///
/// Fails if `.jarvis/` already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<JarvisPaths> {
    let paths = JarvisPaths::new(root);
    if paths.jarvis_dir.exists() && !options.force {
        return Err(anyhow!(
            "jarvis init: .jarvis already exists (use --force to overwrite)"
        ));
    }
    if paths.jarvis_dir.exists() && !paths.jarvis_dir.is_dir() {
        return Err(anyhow!("jarvis init: .jarvis exists but is not a directory"));
    }

    let config = JarvisConfig::default();
    create_dir(&paths.jarvis_dir)?;
    create_dir(&paths.workspace_dir)?;
    create_dir(&paths.outcomes_dir(&config))?;

    write_file(&paths.gitignore_path, GITIGNORE)?;
    write_config(&paths.config_path, &config)?;
    write_file(&paths.plan_path, PLAN_PLACEHOLDER)?;
    save_variables(&paths.variables_path, &VariableStore::new())?;

    // Start from an empty slot so a forced re-init never resumes a stale run.
    if paths.checkpoint_path.exists() {
        fs::remove_file(&paths.checkpoint_path)
            .with_context(|| format!("remove {}", paths.checkpoint_path.display()))?;
    }
    CheckpointStore::open(&paths.checkpoint_path)?;

    info!(root = %root.display(), "initialized .jarvis");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const GITIGNORE: &str = "checkpoint.db\ncheckpoint.db-journal\nvariables.json\n*.tmp\n";

const PLAN_PLACEHOLDER: &str = r#"# Tasks compile in declaration order; a task may only depend on earlier ones.
hints_from_user:
  - "Describe constraints or preferences for every task here."
task_list:
  - task_num: 1
    task: "Describe the first task."
  - task_num: 2
    task: "Describe the second task."
task_dependency:
  "2": [1]
"#;
