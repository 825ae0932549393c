//! Validation of the `.jarvis/` layout, config and plan.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};

use crate::core::invariants::validate_plan;
use crate::io::config::load_config;
use crate::io::init::JarvisPaths;
use crate::io::outcome_store::OutcomeStore;
use crate::io::plan_store::load_plan;
use crate::plan::Plan;

/// Result of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub tasks: usize,
    /// Task numbers with a decodable cached outcome.
    pub compiled: Vec<i64>,
}

/// Validate layout, `config.toml` and `plan.yaml`.
pub fn validate_workspace(root: &Path) -> Result<ValidateOutcome> {
    let paths = JarvisPaths::new(root);
    paths.ensure_initialized()?;
    ensure_file(&paths.config_path)?;
    ensure_file(&paths.plan_path)?;

    let config = load_config(&paths.config_path).context("load config.toml")?;
    let plan = load_valid_plan(&paths.plan_path)?;

    let store = OutcomeStore::new(paths.outcomes_dir(&config));
    let mut compiled = Vec::new();
    for task in &plan.task_list {
        if store
            .load(task.task_num)
            .with_context(|| format!("cached outcome for task {}", task.task_num))?
            .is_some()
        {
            compiled.push(task.task_num);
        }
    }

    Ok(ValidateOutcome {
        tasks: plan.task_list.len(),
        compiled,
    })
}

/// Load `plan.yaml` and reject it when any plan invariant fails.
pub fn load_valid_plan(path: &Path) -> Result<Plan> {
    let plan = load_plan(path)?;
    let errors = validate_plan(&plan);
    if !errors.is_empty() {
        bail!("invalid plan {}:\n- {}", path.display(), errors.join("\n- "));
    }
    Ok(plan)
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    Ok(())
}
