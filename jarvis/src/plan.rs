//! Plan, task and instruction data model.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Plan document (`plan.yaml`) as written by the user or a planning step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    #[serde(default)]
    pub hints_from_user: Vec<String>,
    #[serde(default)]
    pub task_list: Vec<PlanTask>,
    /// Prerequisites keyed by task number. YAML keys may be quoted or bare.
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub task_dependency: BTreeMap<i64, Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanTask {
    pub task_num: i64,
    pub task: String,
}

/// A numbered unit of work with its declared prerequisites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_num: i64,
    pub description: String,
    pub dependencies: BTreeSet<i64>,
}

impl Plan {
    /// Tasks in declaration order with their dependency sets attached.
    pub fn tasks(&self) -> Vec<Task> {
        self.task_list
            .iter()
            .map(|entry| Task {
                task_num: entry.task_num,
                description: entry.task.clone(),
                dependencies: self.dependencies_of(entry.task_num),
            })
            .collect()
    }

    pub fn dependencies_of(&self, task_num: i64) -> BTreeSet<i64> {
        self.task_dependency
            .get(&task_num)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn task(&self, task_num: i64) -> Option<Task> {
        self.tasks().into_iter().find(|t| t.task_num == task_num)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
enum DependencyKey {
    Num(i64),
    Text(String),
}

fn deserialize_dependencies<'de, D>(deserializer: D) -> Result<BTreeMap<i64, Vec<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<DependencyKey, Option<Vec<i64>>> = BTreeMap::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (key, deps) in raw {
        let num = match key {
            DependencyKey::Num(n) => n,
            DependencyKey::Text(text) => text.trim().parse::<i64>().map_err(|_| {
                serde::de::Error::custom(format!("task_dependency key '{text}' is not a task number"))
            })?,
        };
        out.insert(num, deps.unwrap_or_default());
    }
    Ok(out)
}

/// One executable step of a compiled task.
///
/// Branch instructions (`type: If`) carry `args.condition` plus the nested
/// `then`/`else` sequences; every other tag is dispatched as an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instruction {
    #[serde(default, alias = "sequence_number")]
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default, rename = "then", skip_serializing_if = "Option::is_none")]
    pub then_branch: Option<Vec<Instruction>>,
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_branch: Option<Vec<Instruction>>,
}

impl Instruction {
    pub fn is_branch(&self) -> bool {
        self.type_tag.eq_ignore_ascii_case("if") || self.type_tag.eq_ignore_ascii_case("branch")
    }

    pub fn condition(&self) -> Option<&str> {
        self.args.get("condition").and_then(Value::as_str)
    }
}

/// Compiled result for one task, persisted keyed by `task_num`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_num: i64,
    pub task_description: String,
    pub overall_outcome: String,
    pub instructions: Vec<Instruction>,
    /// The generator's document exactly as persisted.
    pub raw_instructions: String,
}

impl TaskOutcome {
    pub fn summary(&self) -> PreviousOutcome {
        PreviousOutcome {
            task_num: self.task_num,
            task: self.task_description.clone(),
            outcome: self.overall_outcome.clone(),
        }
    }
}

/// Structured shape of a task outcome document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDocument {
    pub task_num: i64,
    pub task: String,
    pub overall_outcome: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

/// Dependency outcome handed to the generator when compiling a dependent task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviousOutcome {
    pub task_num: i64,
    pub task: String,
    pub outcome: String,
}
