//! Persistence for the variable store (`.jarvis/variables.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::variables::VariableStore;
use crate::io::write_atomic;

/// Load the store; a missing file is an empty store.
pub fn load_variables(path: &Path) -> Result<VariableStore> {
    if !path.exists() {
        return Ok(VariableStore::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read variables {}", path.display()))?;
    let store: VariableStore = serde_json::from_str(&contents)
        .with_context(|| format!("parse variables {}", path.display()))?;
    debug!(keys = store.len(), "variables loaded");
    Ok(store)
}

/// Atomically write the store (temp file + rename).
pub fn save_variables(path: &Path, store: &VariableStore) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(store)?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
