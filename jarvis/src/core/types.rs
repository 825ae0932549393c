//! Shared deterministic types for the interpreter and control loop.
//!
//! These types carry no I/O and are safe to construct in tests.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Per-iteration metadata decoded from the trailing block of a generation
/// response. Only used as hints for the next generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub plan: Vec<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub current_task_id: Option<String>,
    pub reason: String,
    pub speak: Option<String>,
    pub notebook: Map<String, Value>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self == &Metadata::default()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Fixed-schema answer expected from the completion collaborator when a branch
/// condition is delegated to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchAnswer {
    pub result: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BranchAnswer {
    /// Decode an answer, tolerating a code fence or prose around the JSON object.
    ///
    /// Returns `None` when no object with a boolean `result` can be found.
    pub fn parse(text: &str) -> Option<Self> {
        let object = json_object_slice(text)?;
        serde_json::from_str(object).ok()
    }
}

/// Explicit hint state threaded through the outer control loop.
///
/// Each iteration takes ownership of the context and returns the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintContext {
    pub goal: String,
    pub hints: String,
    /// Set after the user changed the plan; the next prompt announces the new goal.
    #[serde(default)]
    pub goal_changed: bool,
}

impl HintContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            hints: String::new(),
            goal_changed: false,
        }
    }
}

/// Slice from the first `{` to the last `}` (inclusive), if both exist in order.
pub(crate) fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
