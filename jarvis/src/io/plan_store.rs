//! Plan document loading (`.jarvis/plan.yaml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::write_atomic;
use crate::plan::Plan;

pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan: Plan = serde_yaml::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    debug!(tasks = plan.task_list.len(), "plan loaded");
    Ok(plan)
}

pub fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    let buf = serde_yaml::to_string(plan).context("serialize plan yaml")?;
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::plan_with;

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.yaml");
        let plan = plan_with(&[(1, "search"), (2, "report")], &[(2, vec![1])]);
        write_plan(&path, &plan).expect("write");
        assert_eq!(load_plan(&path).expect("load"), plan);
    }

    #[test]
    fn rejects_non_numeric_dependency_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.yaml");
        fs::write(
            &path,
            "task_list:\n  - task_num: 1\n    task: a\ntask_dependency:\n  first: [1]\n",
        )
        .expect("write");
        let err = load_plan(&path).unwrap_err();
        assert!(format!("{err:#}").contains("not a task number"));
    }
}
