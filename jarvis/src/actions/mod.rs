//! Action registry: the closed set of dispatchable actions.
//!
//! Actions are built from a type tag plus a field map ([`Action::from_fields`]),
//! which is the only place required fields are checked. [`Action::run`] never
//! fails: collaborator errors are rendered into the output text so write
//! extraction and branch decisions downstream still have something to scan.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::variables::{VariableStore, value_to_text};
use crate::error::JarvisError;
use crate::io::generator::{GenerateRequest, GenerationPurpose, Generator};
use crate::io::sandbox::{Sandbox, SandboxRequest};
use crate::io::tools::{Extractor, WebSearch};

mod files;

/// Upper bound accepted for an action's own `timeout` field.
pub const MAX_ACTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>\]\[,]+"#).unwrap());

/// Type tags understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    SearchOnline,
    ExtractInfo,
    RunPython,
    TextCompletion,
    Shutdown,
    TellUser,
    ReadFile,
    WriteFile,
    AppendFile,
    FindAndReplace,
    ListDirectory,
    CreateDirectory,
    MemoryGet,
    MemorySet,
}

impl ActionKind {
    pub const ALL: [ActionKind; 14] = [
        ActionKind::SearchOnline,
        ActionKind::ExtractInfo,
        ActionKind::RunPython,
        ActionKind::TextCompletion,
        ActionKind::Shutdown,
        ActionKind::TellUser,
        ActionKind::ReadFile,
        ActionKind::WriteFile,
        ActionKind::AppendFile,
        ActionKind::FindAndReplace,
        ActionKind::ListDirectory,
        ActionKind::CreateDirectory,
        ActionKind::MemoryGet,
        ActionKind::MemorySet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::SearchOnline => "SearchOnline",
            ActionKind::ExtractInfo => "ExtractInfo",
            ActionKind::RunPython => "RunPython",
            ActionKind::TextCompletion => "TextCompletion",
            ActionKind::Shutdown => "Shutdown",
            ActionKind::TellUser => "TellUser",
            ActionKind::ReadFile => "ReadFile",
            ActionKind::WriteFile => "WriteFile",
            ActionKind::AppendFile => "AppendFile",
            ActionKind::FindAndReplace => "FindAndReplace",
            ActionKind::ListDirectory => "ListDirectory",
            ActionKind::CreateDirectory => "CreateDirectory",
            ActionKind::MemoryGet => "MemoryGet",
            ActionKind::MemorySet => "MemorySet",
        }
    }

    /// Tag with its argument fields, as shown to the compiler (`?` marks optional).
    pub fn signature(self) -> &'static str {
        match self {
            ActionKind::SearchOnline => "SearchOnline { query, save_to? }",
            ActionKind::ExtractInfo => "ExtractInfo { url, instructions, save_to? }",
            ActionKind::RunPython => "RunPython { file_name, code?, timeout?, cmd_args? }",
            ActionKind::TextCompletion => "TextCompletion { prompt, save_to? }",
            ActionKind::Shutdown => "Shutdown { summary? }",
            ActionKind::TellUser => "TellUser { message }",
            ActionKind::ReadFile => "ReadFile { path }",
            ActionKind::WriteFile => "WriteFile { path, content }",
            ActionKind::AppendFile => "AppendFile { path, content }",
            ActionKind::FindAndReplace => "FindAndReplace { path, find, replace }",
            ActionKind::ListDirectory => "ListDirectory { path }",
            ActionKind::CreateDirectory => "CreateDirectory { path }",
            ActionKind::MemoryGet => "MemoryGet { key }",
            ActionKind::MemorySet => "MemorySet { key, value }",
        }
    }

    /// Resolve a tag, ignoring case, `_` and `-` (`RUN_PYTHON`, `run-python`).
    /// `RunCode` is accepted for the code-execution action.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        if normalized == "runcode" {
            return Some(ActionKind::RunPython);
        }
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_lowercase() == normalized)
    }
}

/// A validated action carrying only the fields it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SearchOnline {
        query: String,
        save_to: Option<String>,
    },
    ExtractInfo {
        /// First URL candidate; `None` when the input named no URL.
        url: Option<String>,
        instructions: String,
        save_to: Option<String>,
    },
    RunPython {
        file_name: String,
        code: Option<String>,
        timeout: Option<Duration>,
        cmd_args: Vec<String>,
    },
    TextCompletion {
        prompt: String,
        save_to: Option<String>,
    },
    Shutdown {
        summary: String,
    },
    TellUser {
        message: String,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    AppendFile {
        path: String,
        content: String,
    },
    FindAndReplace {
        path: String,
        find: String,
        replace: String,
    },
    ListDirectory {
        path: String,
    },
    CreateDirectory {
        path: String,
    },
    MemoryGet {
        key: String,
    },
    MemorySet {
        key: String,
        value: Value,
    },
}

/// Collaborators an action may call while running.
pub struct Toolbox<'a> {
    /// Directory that file actions and code execution are confined to.
    pub workspace: &'a Path,
    pub generator: &'a dyn Generator,
    pub search: &'a dyn WebSearch,
    pub extractor: &'a dyn Extractor,
    pub sandbox: &'a dyn Sandbox,
    /// Used when a `RunPython` action names no timeout.
    pub default_code_timeout: Duration,
    /// Longer requested timeouts are clamped to this.
    pub max_code_timeout: Duration,
}

impl Action {
    /// Build an action from a type tag and its argument map.
    ///
    /// Unknown tags and missing required fields are validation errors.
    pub fn from_fields(tag: &str, fields: &Map<String, Value>) -> Result<Self, JarvisError> {
        let kind = ActionKind::from_tag(tag)
            .ok_or_else(|| JarvisError::validation(format!("unknown action type '{tag}'")))?;
        let f = Fields { kind, map: fields };
        let action = match kind {
            ActionKind::SearchOnline => Action::SearchOnline {
                query: f.required(&["query"])?,
                save_to: f.optional(&["save_to"]),
            },
            ActionKind::ExtractInfo => Action::ExtractInfo {
                url: f.first_url(&["url", "urls"]),
                instructions: f.required(&["instructions", "instruction"])?,
                save_to: f.optional(&["save_to"]),
            },
            ActionKind::RunPython => Action::RunPython {
                file_name: f.required(&["file_name", "FILE_NAME", "path"])?,
                code: f.optional_raw(&["code"]),
                timeout: f.timeout(&["timeout"])?,
                cmd_args: f.args_list(&["cmd_args", "args"]),
            },
            ActionKind::TextCompletion => Action::TextCompletion {
                prompt: f.required(&["prompt", "text"])?,
                save_to: f.optional(&["save_to"]),
            },
            ActionKind::Shutdown => Action::Shutdown {
                summary: f.optional(&["summary", "reason"]).unwrap_or_default(),
            },
            ActionKind::TellUser => Action::TellUser {
                message: f.required(&["message", "text"])?,
            },
            ActionKind::ReadFile => Action::ReadFile {
                path: f.required(&["path"])?,
            },
            ActionKind::WriteFile => Action::WriteFile {
                path: f.required(&["path"])?,
                content: f.required_raw(&["content"])?,
            },
            ActionKind::AppendFile => Action::AppendFile {
                path: f.required(&["path"])?,
                content: f.required_raw(&["content"])?,
            },
            ActionKind::FindAndReplace => Action::FindAndReplace {
                path: f.required(&["path"])?,
                find: f.required_raw(&["find"]).and_then(|find| {
                    if find.is_empty() {
                        Err(JarvisError::validation("FindAndReplace: 'find' must not be empty"))
                    } else {
                        Ok(find)
                    }
                })?,
                replace: f.optional_raw(&["replace"]).unwrap_or_default(),
            },
            ActionKind::ListDirectory => Action::ListDirectory {
                path: f.optional(&["path"]).unwrap_or_else(|| ".".to_string()),
            },
            ActionKind::CreateDirectory => Action::CreateDirectory {
                path: f.required(&["path"])?,
            },
            ActionKind::MemoryGet => Action::MemoryGet {
                key: f.required(&["key", "k"])?,
            },
            ActionKind::MemorySet => Action::MemorySet {
                key: f.required(&["key", "k"])?,
                value: f
                    .value(&["value", "v"])
                    .ok_or_else(|| f.missing(&["value"]))?,
            },
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::SearchOnline { .. } => ActionKind::SearchOnline,
            Action::ExtractInfo { .. } => ActionKind::ExtractInfo,
            Action::RunPython { .. } => ActionKind::RunPython,
            Action::TextCompletion { .. } => ActionKind::TextCompletion,
            Action::Shutdown { .. } => ActionKind::Shutdown,
            Action::TellUser { .. } => ActionKind::TellUser,
            Action::ReadFile { .. } => ActionKind::ReadFile,
            Action::WriteFile { .. } => ActionKind::WriteFile,
            Action::AppendFile { .. } => ActionKind::AppendFile,
            Action::FindAndReplace { .. } => ActionKind::FindAndReplace,
            Action::ListDirectory { .. } => ActionKind::ListDirectory,
            Action::CreateDirectory { .. } => ActionKind::CreateDirectory,
            Action::MemoryGet { .. } => ActionKind::MemoryGet,
            Action::MemorySet { .. } => ActionKind::MemorySet,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Action::Shutdown { .. })
    }

    /// One-line description for logs and hint text.
    pub fn describe(&self) -> String {
        let detail = match self {
            Action::SearchOnline { query, .. } => format!("query={}", clip(query)),
            Action::ExtractInfo { url, instructions, .. } => format!(
                "url={}, instructions={}",
                url.as_deref().unwrap_or("<none>"),
                clip(instructions)
            ),
            Action::RunPython {
                file_name,
                timeout,
                cmd_args,
                ..
            } => {
                let mut s = format!("file={file_name}");
                if let Some(t) = timeout {
                    s.push_str(&format!(", timeout={}s", t.as_secs()));
                }
                if !cmd_args.is_empty() {
                    s.push_str(&format!(", args={}", cmd_args.join(" ")));
                }
                s
            }
            Action::TextCompletion { prompt, .. } => format!("prompt={}", clip(prompt)),
            Action::Shutdown { summary } => format!("summary={}", clip(summary)),
            Action::TellUser { message } => format!("message={}", clip(message)),
            Action::ReadFile { path }
            | Action::ListDirectory { path }
            | Action::CreateDirectory { path } => format!("path={path}"),
            Action::WriteFile { path, content } | Action::AppendFile { path, content } => {
                format!("path={path}, {} bytes", content.len())
            }
            Action::FindAndReplace { path, find, .. } => {
                format!("path={path}, find={}", clip(find))
            }
            Action::MemoryGet { key } => format!("key={key}"),
            Action::MemorySet { key, value } => {
                format!("key={key}, value={}", clip(&value_to_text(value)))
            }
        };
        format!("{}({detail})", self.kind().as_str())
    }

    /// Execute the action and return its output text. Never fails.
    #[instrument(skip_all, fields(action = self.kind().as_str()))]
    pub fn run(&self, toolbox: &Toolbox<'_>, variables: &mut VariableStore) -> String {
        match self {
            Action::SearchOnline { query, save_to } => {
                match toolbox.search.search(query) {
                    Ok(results) => with_save(results, save_to.as_deref()),
                    Err(err) => {
                        warn!(err = %err, "search failed");
                        format!("SearchOnline failed: {err:#}")
                    }
                }
            }
            Action::ExtractInfo {
                url,
                instructions,
                save_to,
            } => {
                let Some(url) = url else {
                    return "ExtractInfo failed: could not identify a URL in the input; \
                            provide the url explicitly"
                        .to_string();
                };
                match toolbox.extractor.extract(url, instructions) {
                    Ok(info) => with_save(info, save_to.as_deref()),
                    Err(err) => {
                        warn!(err = %err, url = %url, "extraction failed");
                        format!("ExtractInfo failed for {url}: {err:#}")
                    }
                }
            }
            Action::RunPython {
                file_name,
                code,
                timeout,
                cmd_args,
            } => {
                let requested = timeout.unwrap_or(toolbox.default_code_timeout);
                if requested > toolbox.max_code_timeout {
                    warn!(
                        requested_secs = requested.as_secs(),
                        max_secs = toolbox.max_code_timeout.as_secs(),
                        "clamping code timeout"
                    );
                }
                let request = SandboxRequest {
                    workdir: toolbox.workspace.to_path_buf(),
                    file_name: file_name.clone(),
                    code: code.clone(),
                    args: cmd_args.clone(),
                    timeout: requested.min(toolbox.max_code_timeout),
                };
                match toolbox.sandbox.execute(&request) {
                    Ok(output) => output.render(),
                    Err(err) => {
                        warn!(err = %err, file = %file_name, "code execution failed");
                        format!("RunPython failed: {err:#}")
                    }
                }
            }
            Action::TextCompletion { prompt, save_to } => {
                let request = GenerateRequest::new(GenerationPurpose::Completion, prompt.clone());
                match toolbox.generator.generate(&request) {
                    Ok(text) => with_save(text, save_to.as_deref()),
                    Err(err) => {
                        warn!(err = %err, "text completion failed");
                        format!("TextCompletion failed: {err:#}")
                    }
                }
            }
            Action::Shutdown { summary } => summary.clone(),
            Action::TellUser { message } => {
                println!("{message}");
                format!("told user: {message}")
            }
            Action::ReadFile { path } => files::read_file(toolbox.workspace, path),
            Action::WriteFile { path, content } => {
                files::write_file(toolbox.workspace, path, content, false)
            }
            Action::AppendFile { path, content } => {
                files::write_file(toolbox.workspace, path, content, true)
            }
            Action::FindAndReplace {
                path,
                find,
                replace,
            } => files::find_and_replace(toolbox.workspace, path, find, replace),
            Action::ListDirectory { path } => files::list_directory(toolbox.workspace, path),
            Action::CreateDirectory { path } => files::create_directory(toolbox.workspace, path),
            Action::MemoryGet { key } => match variables.get(key) {
                Some(value) => format!("{key} = {}", value_to_text(value)),
                None => format!("MemoryGet: no value stored for '{key}'"),
            },
            Action::MemorySet { key, value } => {
                variables.set(key.clone(), value.clone());
                info!(key = %key, "memory set");
                format!("stored '{key}'")
            }
        }
    }
}

/// Append a write statement so `save_to` lands in the variable store through
/// the regular write-extraction path.
fn with_save(output: String, save_to: Option<&str>) -> String {
    match save_to {
        Some(key) => {
            let encoded = serde_json::to_string(&output).unwrap_or_else(|_| output.clone());
            format!("{output}\nSET {key} = {encoded}")
        }
        None => output,
    }
}

fn clip(text: &str) -> String {
    const MAX: usize = 80;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= MAX && line.len() == text.len() {
        return line.to_string();
    }
    let clipped: String = line.chars().take(MAX).collect();
    format!("{clipped}...")
}

/// Field accessor bound to one action kind, for uniform error messages.
struct Fields<'a> {
    kind: ActionKind,
    map: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn value(&self, names: &[&str]) -> Option<Value> {
        names
            .iter()
            .find_map(|name| self.map.get(*name))
            .filter(|v| !v.is_null())
            .cloned()
    }

    fn missing(&self, names: &[&str]) -> JarvisError {
        JarvisError::validation(format!(
            "{}: missing required field '{}'",
            self.kind.as_str(),
            names[0]
        ))
    }

    /// Raw text, untrimmed (file contents, code).
    fn optional_raw(&self, names: &[&str]) -> Option<String> {
        self.value(names).map(|v| value_to_text(&v))
    }

    fn optional(&self, names: &[&str]) -> Option<String> {
        self.optional_raw(names)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required(&self, names: &[&str]) -> Result<String, JarvisError> {
        self.optional(names).ok_or_else(|| self.missing(names))
    }

    fn required_raw(&self, names: &[&str]) -> Result<String, JarvisError> {
        self.optional_raw(names).ok_or_else(|| self.missing(names))
    }

    fn timeout(&self, names: &[&str]) -> Result<Option<Duration>, JarvisError> {
        let Some(value) = self.value(names) else {
            return Ok(None);
        };
        let secs = match &value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let duration = secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| *d <= MAX_ACTION_TIMEOUT);
        duration.map(Some).ok_or_else(|| {
            JarvisError::validation(format!(
                "{}: timeout must be a positive number of seconds up to {}, got {value}",
                self.kind.as_str(),
                MAX_ACTION_TIMEOUT.as_secs()
            ))
        })
    }

    fn args_list(&self, names: &[&str]) -> Vec<String> {
        match self.value(names) {
            Some(Value::Array(items)) => items.iter().map(value_to_text).collect(),
            Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            Some(other) => vec![other.to_string()],
            None => Vec::new(),
        }
    }

    /// First URL candidate from a string or list; `None` if there is none.
    fn first_url(&self, names: &[&str]) -> Option<String> {
        match self.value(names)? {
            Value::Array(items) => items.iter().find_map(|item| match item {
                Value::String(s) => first_url_in(s),
                _ => None,
            }),
            Value::String(s) => first_url_in(&s),
            _ => None,
        }
    }
}

fn first_url_in(text: &str) -> Option<String> {
    URL_RE.find(text).map(|m| m.as_str().to_string())
}
