//! File and directory action bodies, confined to the workspace directory.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

/// Resolve `relative` inside `workspace`, rejecting absolute paths and `..`.
fn resolve(workspace: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative.trim());
    if path.is_absolute() {
        bail!("path '{relative}' must be relative to the workspace");
    }
    let mut resolved = workspace.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("path '{relative}' escapes the workspace");
            }
        }
    }
    Ok(resolved)
}

/// Render an error as action output text.
fn failure(action: &str, path: &str, err: &anyhow::Error) -> String {
    warn!(action, path, err = %err, "file action failed");
    format!("{action} failed for '{path}': {err:#}")
}

pub(super) fn read_file(workspace: &Path, path: &str) -> String {
    let result = resolve(workspace, path).and_then(|full| {
        fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))
    });
    match result {
        Ok(content) => content,
        Err(err) => failure("ReadFile", path, &err),
    }
}

pub(super) fn write_file(workspace: &Path, path: &str, content: &str, append: bool) -> String {
    let action = if append { "AppendFile" } else { "WriteFile" };
    let result = (|| -> Result<usize> {
        let full = resolve(workspace, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&full)
            .with_context(|| format!("open {}", full.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("write {}", full.display()))?;
        Ok(content.len())
    })();
    match result {
        Ok(bytes) => {
            debug!(action, path, bytes, "file written");
            if append {
                format!("appended {bytes} bytes to {path}")
            } else {
                format!("wrote {bytes} bytes to {path}")
            }
        }
        Err(err) => failure(action, path, &err),
    }
}

pub(super) fn find_and_replace(workspace: &Path, path: &str, find: &str, replace: &str) -> String {
    let result = (|| -> Result<usize> {
        if find.is_empty() {
            bail!("nothing to find");
        }
        let full = resolve(workspace, path)?;
        let content =
            fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))?;
        let count = content.matches(find).count();
        if count == 0 {
            return Ok(0);
        }
        fs::write(&full, content.replace(find, replace))
            .with_context(|| format!("write {}", full.display()))?;
        Ok(count)
    })();
    match result {
        Ok(0) => format!("FindAndReplace: text not found in {path}"),
        Ok(count) => format!("replaced {count} occurrence(s) in {path}"),
        Err(err) => failure("FindAndReplace", path, &err),
    }
}

/// Sorted entry names; directories carry a trailing `/`.
pub(super) fn list_directory(workspace: &Path, path: &str) -> String {
    let result = (|| -> Result<Vec<String>> {
        let full = resolve(workspace, path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).with_context(|| format!("read dir {}", full.display()))? {
            let entry = entry.context("read dir entry")?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().context("entry file type")?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    })();
    match result {
        Ok(names) if names.is_empty() => format!("{path} is empty"),
        Ok(names) => names.join("\n"),
        Err(err) => failure("ListDirectory", path, &err),
    }
}

pub(super) fn create_directory(workspace: &Path, path: &str) -> String {
    let result = resolve(workspace, path).and_then(|full| {
        fs::create_dir_all(&full).with_context(|| format!("create dir {}", full.display()))
    });
    match result {
        Ok(()) => format!("created directory {path}"),
        Err(err) => failure("CreateDirectory", path, &err),
    }
}
