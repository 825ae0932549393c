//! I/O adapters: processes, collaborators, persistence and prompts.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod checkpoint;
pub mod config;
pub mod confirm;
pub mod generator;
pub mod init;
pub mod outcome_store;
pub mod plan_store;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod tools;
pub mod variable_store;

/// Write `contents` next to `path` and rename it into place.
///
/// Readers see either the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
