//! Decoder for free-form interpreter responses.
//!
//! A response is one action line (matched against an ordered prefix table),
//! an optional fenced payload, and a trailing JSON metadata object:
//!
//! ~~~text
//! WRITE_FILE: notes.md
//! ```md
//! # Notes
//! ```
//! {"reason": "...", "plan": ["..."]}
//! ~~~
//!
//! Fenced payloads find their closing fence by scanning backward from the end
//! of the text, so a payload may itself contain fence lines.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::actions::Action;
use crate::core::types::{Metadata, json_object_slice};
use crate::core::variables::parse_literal;
use crate::error::JarvisError;

static RUN_PYTHON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*),[ \t]*([^,]*?)[ \t]*$").unwrap());

/// Position of the first line after the payload; metadata starts there.
type PrefixParser = fn(&str, &[&str]) -> Result<(Action, usize), JarvisError>;

/// Qualified prefixes come before bare ones.
const PREFIXES: &[(&str, PrefixParser)] = &[
    ("TELL_USER:", parse_tell_user),
    ("READ_FILE:", parse_read_file),
    ("WRITE_FILE:", parse_write_file),
    ("APPEND_FILE:", parse_append_file),
    ("RUN_PYTHON:", parse_run_python),
    ("SEARCH_ONLINE:", parse_search_online),
    ("EXTRACT_INFO:", parse_extract_info),
    ("FIND_AND_REPLACE:", parse_find_and_replace),
    ("LIST_DIRECTORY:", parse_list_directory),
    ("CREATE_DIRECTORY:", parse_create_directory),
    ("MEMORY_GET:", parse_memory_get),
    ("MEMORY_SET:", parse_memory_set),
    ("TEXT_COMPLETION:", parse_text_completion),
    ("SHUTDOWN:", parse_shutdown),
    ("SHUTDOWN", parse_shutdown),
];

/// Decode a response into its action and metadata.
///
/// Errors only on empty input, an unknown first-line prefix, or a
/// structurally malformed payload. Unreadable metadata degrades to empty.
pub fn parse(text: &str) -> Result<(Action, Metadata), JarvisError> {
    let text = text.trim_matches(|c: char| c == '\n' || c == '\r');
    if text.trim().is_empty() {
        return Err(JarvisError::parse("empty response"));
    }
    let lines: Vec<&str> = text.lines().collect();
    let first = lines[0].trim();

    let (prefix, parser) = PREFIXES
        .iter()
        .find(|(prefix, _)| first.starts_with(prefix))
        .ok_or_else(|| JarvisError::parse(format!("unknown action prefix in line '{first}'")))?;
    let rest = first[prefix.len()..].trim();
    debug!(prefix, "matched response prefix");

    let (action, metadata_start) = parser(rest, &lines)?;
    let metadata = parse_metadata(lines.get(metadata_start..).unwrap_or_default());
    Ok((action, metadata))
}

fn parse_metadata(lines: &[&str]) -> Metadata {
    let text = lines.join("\n");
    if text.trim().is_empty() {
        return Metadata::default();
    }
    let Some(object) = json_object_slice(&text) else {
        warn!("trailing response text has no JSON object; using empty metadata");
        return Metadata::default();
    };
    match serde_json::from_str::<Metadata>(object) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(err = %err, "metadata did not decode; using empty metadata");
            Metadata::default()
        }
    }
}

fn build(tag: &str, fields: Value) -> Result<Action, JarvisError> {
    let Value::Object(map) = fields else {
        return Err(JarvisError::parse(format!("{tag}: fields must be a mapping")));
    };
    Action::from_fields(tag, &map).map_err(|err| match err {
        JarvisError::Validation(msg) => JarvisError::Parse(msg),
        other => other,
    })
}

fn require_payload<'a>(tag: &str, rest: &'a str) -> Result<&'a str, JarvisError> {
    if rest.is_empty() {
        Err(JarvisError::parse(format!("{tag}: missing payload")))
    } else {
        Ok(rest)
    }
}

fn split_comma<'a>(tag: &str, rest: &'a str) -> Result<(&'a str, &'a str), JarvisError> {
    rest.split_once(',')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| JarvisError::parse(format!("{tag}: expected '<a>, <b>' but found no comma")))
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Fenced block opening on line 1 and closing at the last fence line.
/// Returns the content and the index after the closing fence.
fn fenced_payload(tag: &str, lines: &[&str]) -> Result<(String, usize), JarvisError> {
    if !lines.get(1).is_some_and(|line| is_fence(line)) {
        return Err(JarvisError::parse(format!(
            "{tag}: expected an opening ``` fence on the line after the action"
        )));
    }
    let content_start = 2;
    let close = (content_start..lines.len())
        .rev()
        .find(|&idx| is_fence(lines[idx]))
        .ok_or_else(|| JarvisError::parse(format!("{tag}: missing closing ``` fence")))?;
    Ok((lines[content_start..close].join("\n"), close + 1))
}

fn parse_tell_user(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let message = require_payload("TELL_USER", rest)?;
    Ok((build("TellUser", json!({ "message": message }))?, 1))
}

fn parse_read_file(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let path = require_payload("READ_FILE", rest)?;
    Ok((build("ReadFile", json!({ "path": path }))?, 1))
}

fn parse_write_file(rest: &str, lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let path = require_payload("WRITE_FILE", rest)?;
    let (content, next) = fenced_payload("WRITE_FILE", lines)?;
    Ok((
        build("WriteFile", json!({ "path": path, "content": content }))?,
        next,
    ))
}

fn parse_append_file(rest: &str, lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let path = require_payload("APPEND_FILE", rest)?;
    let (content, next) = fenced_payload("APPEND_FILE", lines)?;
    Ok((
        build("AppendFile", json!({ "path": path, "content": content }))?,
        next,
    ))
}

/// `RUN_PYTHON: <file> [args...], <timeout>` with an optional fenced code
/// block on the following lines.
fn parse_run_python(rest: &str, lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let caps = RUN_PYTHON_RE.captures(rest).ok_or_else(|| {
        JarvisError::parse(format!(
            "RUN_PYTHON: expected '<file>, <timeout>' but got '{rest}'"
        ))
    })?;
    let timeout_raw = caps[2].trim();
    let timeout: u64 = timeout_raw.parse().map_err(|_| {
        JarvisError::parse(format!(
            "RUN_PYTHON: timeout '{timeout_raw}' is not a whole number of seconds"
        ))
    })?;
    let mut words = caps[1].split_whitespace();
    let file_name = words
        .next()
        .ok_or_else(|| JarvisError::parse("RUN_PYTHON: missing file name"))?;
    let cmd_args: Vec<&str> = words.collect();

    let mut fields = Map::new();
    fields.insert("file_name".into(), json!(file_name));
    fields.insert("timeout".into(), json!(timeout));
    fields.insert("cmd_args".into(), json!(cmd_args));
    let mut next = 1;
    if lines.get(1).is_some_and(|line| is_fence(line)) {
        let (code, after) = fenced_payload("RUN_PYTHON", lines)?;
        fields.insert("code".into(), json!(code));
        next = after;
    }
    Ok((build("RunPython", Value::Object(fields))?, next))
}

fn parse_search_online(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let query = require_payload("SEARCH_ONLINE", rest)?;
    Ok((build("SearchOnline", json!({ "query": query }))?, 1))
}

fn parse_extract_info(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let (url, instructions) = split_comma("EXTRACT_INFO", rest)?;
    Ok((
        build(
            "ExtractInfo",
            json!({ "url": url, "instructions": instructions }),
        )?,
        1,
    ))
}

/// Path on the action line, then a `find` block and a `replace` block.
fn parse_find_and_replace(rest: &str, lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let path = require_payload("FIND_AND_REPLACE", rest)?;
    let missing = || JarvisError::parse("FIND_AND_REPLACE: expected two fenced blocks");
    let fences: Vec<usize> = (1..lines.len()).filter(|&idx| is_fence(lines[idx])).collect();
    if fences.len() < 4 {
        return Err(missing());
    }
    let (find_open, find_close, replace_open) = (fences[0], fences[1], fences[2]);
    let replace_close = *fences.last().ok_or_else(missing)?;

    let find = lines[find_open + 1..find_close].join("\n");
    let replace = lines[replace_open + 1..replace_close].join("\n");
    Ok((
        build(
            "FindAndReplace",
            json!({ "path": path, "find": find, "replace": replace }),
        )?,
        replace_close + 1,
    ))
}

fn parse_list_directory(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let path = if rest.is_empty() { "." } else { rest };
    Ok((build("ListDirectory", json!({ "path": path }))?, 1))
}

fn parse_create_directory(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let path = require_payload("CREATE_DIRECTORY", rest)?;
    Ok((build("CreateDirectory", json!({ "path": path }))?, 1))
}

fn parse_memory_get(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let key = require_payload("MEMORY_GET", rest)?;
    Ok((build("MemoryGet", json!({ "key": key }))?, 1))
}

fn parse_memory_set(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let (key, value) = split_comma("MEMORY_SET", rest)?;
    Ok((
        build("MemorySet", json!({ "key": key, "value": parse_literal(value) }))?,
        1,
    ))
}

fn parse_text_completion(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let prompt = require_payload("TEXT_COMPLETION", rest)?;
    Ok((build("TextCompletion", json!({ "prompt": prompt }))?, 1))
}

fn parse_shutdown(rest: &str, _lines: &[&str]) -> Result<(Action, usize), JarvisError> {
    let summary = rest.trim_start_matches(':').trim();
    Ok((build("Shutdown", json!({ "summary": summary }))?, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn shutdown_with_metadata() {
        let (action, metadata) =
            parse("SHUTDOWN: done\n{\"reason\":\"x\",\"plan\":[]}").expect("parse");
        assert_eq!(
            action,
            Action::Shutdown {
                summary: "done".to_string()
            }
        );
        assert_eq!(metadata.reason, "x");
        assert!(metadata.plan.is_empty());
    }

    #[test]
    fn bare_shutdown_matches_after_qualified_prefixes() {
        let (action, metadata) = parse("SHUTDOWN").expect("parse");
        assert_eq!(
            action,
            Action::Shutdown {
                summary: String::new()
            }
        );
        assert!(metadata.is_empty());
    }

    #[test]
    fn empty_and_unknown_inputs_are_parse_errors() {
        assert!(parse("").unwrap_err().is_parse());
        assert!(parse("  \n ").unwrap_err().is_parse());
        assert!(parse("UNKNOWN_TYPE: foo").unwrap_err().is_parse());
    }

    #[test]
    fn run_python_requires_numeric_timeout() {
        assert!(parse("RUN_PYTHON: script.py").unwrap_err().is_parse());
        assert!(parse("RUN_PYTHON: script.py, soon").unwrap_err().is_parse());

        let (action, _) = parse("RUN_PYTHON: script.py --fast, 20").expect("parse");
        assert_eq!(
            action,
            Action::RunPython {
                file_name: "script.py".to_string(),
                code: None,
                timeout: Some(Duration::from_secs(20)),
                cmd_args: vec!["--fast".to_string()],
            }
        );
    }

    #[test]
    fn run_python_oversized_timeout_is_parse_error() {
        let err = parse("RUN_PYTHON: a.py, 18446744073709551615").unwrap_err();
        assert!(err.is_parse());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn write_file_scans_backward_for_closing_fence() {
        let text = "WRITE_FILE: README.md\n```md\n# Title\n```sh\ncargo run\n```\nend\n```\n{\"reason\":\"write docs\",\"plan\":[\"a\",\"b\"]}";
        let (action, metadata) = parse(text).expect("parse");
        let Action::WriteFile { path, content } = action else {
            panic!("expected WriteFile");
        };
        assert_eq!(path, "README.md");
        assert_eq!(content, "# Title\n```sh\ncargo run\n```\nend");
        assert_eq!(metadata.reason, "write docs");
        assert_eq!(metadata.plan, vec!["a", "b"]);
    }

    #[test]
    fn write_file_without_fences_is_parse_error() {
        assert!(parse("WRITE_FILE: a.txt\nhello").unwrap_err().is_parse());
        assert!(parse("WRITE_FILE: a.txt\n```\nhello").unwrap_err().is_parse());
    }

    #[test]
    fn find_and_replace_reads_two_blocks() {
        let text = "FIND_AND_REPLACE: src/app.py\n```\nold()\n```\n```\nnew()\n```\n{\"reason\":\"rename\",\"plan\":[]}";
        let (action, metadata) = parse(text).expect("parse");
        assert_eq!(
            action,
            Action::FindAndReplace {
                path: "src/app.py".to_string(),
                find: "old()".to_string(),
                replace: "new()".to_string(),
            }
        );
        assert_eq!(metadata.reason, "rename");
        assert!(parse("FIND_AND_REPLACE: a.py\n```\nold\n```").unwrap_err().is_parse());
    }

    #[test]
    fn find_and_replace_with_empty_find_block_is_parse_error() {
        let err = parse("FIND_AND_REPLACE: a.txt\n```\n```\n```\nX\n```").unwrap_err();
        assert!(err.is_parse());
        assert!(err.to_string().contains("'find'"));
    }

    #[test]
    fn comma_separated_actions_require_comma() {
        assert!(parse("MEMORY_SET: only_key").unwrap_err().is_parse());
        assert!(parse("EXTRACT_INFO: https://a.example").unwrap_err().is_parse());

        let (action, _) = parse("MEMORY_SET: count, 3").expect("parse");
        assert_eq!(
            action,
            Action::MemorySet {
                key: "count".to_string(),
                value: serde_json::json!(3),
            }
        );
    }

    #[test]
    fn malformed_metadata_degrades_to_empty() {
        let (action, metadata) = parse("TELL_USER: hi\nnot json at all").expect("parse");
        assert_eq!(
            action,
            Action::TellUser {
                message: "hi".to_string()
            }
        );
        assert!(metadata.is_empty());
    }
}
