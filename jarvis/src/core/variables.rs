//! Variable store plus the placeholder and write-statement grammar.
//!
//! Grammar (the only place these patterns are matched):
//!
//! - `{{GET key}}` inside an instruction argument reads `key` before dispatch.
//! - `{{SET key}}` marks a write target and is left untouched.
//! - A line `SET key = value` in an action's output writes `key`. The value is
//!   parsed as a JSON literal when possible, otherwise stored as raw text.
//!
//! Keys match `[A-Za-z_][A-Za-z0-9_.-]*`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

static READ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*GET\s+([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").unwrap()
});

static WHOLE_READ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{\{\s*GET\s+([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}\s*$").unwrap()
});

static WRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*SET[ \t]+([A-Za-z_][A-Za-z0-9_.\-]*)[ \t]*=[ \t]*(.*?)[ \t]*\r?$")
        .unwrap()
});

/// Process-wide key/value store. Last writer wins; keys are never deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStore {
    values: BTreeMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Overwrite `key` silently.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(key = %key, "variable set");
        self.values.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Render a stored value for text interpolation: strings raw, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{GET key}}` in `text` with the stored value.
///
/// Unknown keys are left in place so the action can report what it received.
pub fn substitute_text(text: &str, store: &VariableStore) -> String {
    READ_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match store.get(key) {
                Some(value) => value_to_text(value),
                None => {
                    warn!(key, "read of unknown variable left unresolved");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Substitute reads inside an argument value, recursing into lists and maps.
///
/// A string that is exactly one read placeholder takes the stored value as-is,
/// so a list stays a list.
pub fn substitute_value(value: &Value, store: &VariableStore) -> Value {
    match value {
        Value::String(text) => {
            if let Some(caps) = WHOLE_READ_RE.captures(text)
                && let Some(stored) = store.get(&caps[1])
            {
                return stored.clone();
            }
            Value::String(substitute_text(text, store))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, store))
                .collect(),
        ),
        Value::Object(map) => Value::Object(substitute_args(map, store)),
        other => other.clone(),
    }
}

pub fn substitute_args(args: &Map<String, Value>, store: &VariableStore) -> Map<String, Value> {
    args.iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, store)))
        .collect()
}

/// Scan action output for `SET key = value` lines, in order of appearance.
pub fn extract_writes(output: &str) -> Vec<(String, Value)> {
    WRITE_RE
        .captures_iter(output)
        .map(|caps| (caps[1].to_string(), parse_literal(&caps[2])))
        .collect()
}

/// Apply every write statement found in `output`. Returns the written keys.
pub fn apply_writes(output: &str, store: &mut VariableStore) -> Vec<String> {
    let writes = extract_writes(output);
    let mut keys = Vec::with_capacity(writes.len());
    for (key, value) in writes {
        store.set(key.clone(), value);
        keys.push(key);
    }
    keys
}

/// Parse a literal: JSON first, then single-quoted text and Python-style
/// `True`/`False`/`None`; anything else is kept as raw text.
pub fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "None" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_placeholder_resolves_literal() {
        let mut store = VariableStore::new();
        apply_writes("SET key = 42", &mut store);
        assert_eq!(store.get("key"), Some(&json!(42)));
        assert_eq!(substitute_text("value is {{GET key}}", &store), "value is 42");
        assert_eq!(substitute_value(&json!("{{GET key}}"), &store), json!(42));
    }

    #[test]
    fn write_placeholder_is_left_untouched() {
        let mut store = VariableStore::new();
        store.set("out", json!("x"));
        let text = "save into {{SET out}} then read {{GET out}}";
        assert_eq!(
            substitute_text(text, &store),
            "save into {{SET out}} then read x"
        );
    }

    #[test]
    fn unknown_read_is_left_in_place() {
        let store = VariableStore::new();
        assert_eq!(substitute_text("{{GET missing}}", &store), "{{GET missing}}");
        assert_eq!(
            substitute_value(&json!("{{GET missing}}"), &store),
            json!("{{GET missing}}")
        );
    }

    #[test]
    fn whole_placeholder_keeps_list_type() {
        let mut store = VariableStore::new();
        store.set("urls", json!(["https://a.example", "https://b.example"]));
        let args = json!({"url": "{{GET urls}}", "note": "first of {{GET urls}}"});
        let Value::Object(map) = args else {
            unreachable!()
        };
        let out = substitute_args(&map, &store);
        assert_eq!(out["url"], json!(["https://a.example", "https://b.example"]));
        assert_eq!(
            out["note"],
            json!("first of [\"https://a.example\",\"https://b.example\"]")
        );
    }

    #[test]
    fn extracts_every_write_with_literal_fallback() {
        let output = "noise\nSET count = 3\n  SET name = 'bob'\nSET raw = hello world\nSET flag = True\nnot SET x = 1";
        let writes = extract_writes(output);
        assert_eq!(
            writes,
            vec![
                ("count".to_string(), json!(3)),
                ("name".to_string(), json!("bob")),
                ("raw".to_string(), json!("hello world")),
                ("flag".to_string(), json!(true)),
            ]
        );
    }

    #[test]
    fn later_write_wins() {
        let mut store = VariableStore::new();
        let keys = apply_writes("SET k = 1\nSET k = [1, 2]", &mut store);
        assert_eq!(keys, vec!["k", "k"]);
        assert_eq!(store.get("k"), Some(&json!([1, 2])));
        assert_eq!(store.len(), 1);
    }
}
