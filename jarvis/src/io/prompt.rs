//! Prompt rendering for every generation purpose.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, the trailing droppable
//! section is cut from the front (its most recent text survives), then other
//! droppable sections are removed in a fixed order. Required sections are never
//! touched.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::actions::ActionKind;
use crate::compiler::TaskContext;
use crate::core::types::HintContext;

const COMPILE_TEMPLATE: &str = include_str!("prompts/compile_task.md");
const BRANCH_TEMPLATE: &str = include_str!("prompts/branch.md");
const INTERPRETER_TEMPLATE: &str = include_str!("prompts/interpreter.md");
const REVISE_GOAL_TEMPLATE: &str = include_str!("prompts/revise_goal.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review_task.md");

const TRUNCATED_MARKER: &str = "[earlier text truncated]\n";

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap());

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("compile_task", COMPILE_TEMPLATE)
            .expect("compile_task template should be valid");
        env.add_template("branch", BRANCH_TEMPLATE)
            .expect("branch template should be valid");
        env.add_template("interpreter", INTERPRETER_TEMPLATE)
            .expect("interpreter template should be valid");
        env.add_template("revise_goal", REVISE_GOAL_TEMPLATE)
            .expect("revise_goal template should be valid");
        env.add_template("review_task", REVIEW_TEMPLATE)
            .expect("review_task template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Keep the last `keep` bytes of `text`, on a char boundary.
fn keep_tail(text: &str, keep: usize) -> &str {
    let mut start = text.len().saturating_sub(keep);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    if total_len(sections) <= budget {
        return;
    }

    if let Some(last) = sections.last()
        && !last.required
    {
        let others = total_len(sections) - last.content.len();
        let allowed = budget.saturating_sub(others);
        let before_len = last.content.len();
        if allowed > TRUNCATED_MARKER.len() * 2 {
            let tail = keep_tail(&last.content, allowed - TRUNCATED_MARKER.len()).to_string();
            if let Some(last) = sections.last_mut() {
                last.content = format!("{TRUNCATED_MARKER}{tail}");
                debug!(
                    section = last.key,
                    before_len,
                    after_len = last.content.len(),
                    "truncated section for budget"
                );
            }
        } else if let Some(dropped) = sections.pop() {
            debug!(section = dropped.key, bytes_dropped = before_len, "dropped section for budget");
        }
    }

    for key in drop_order {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(
                section = *key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .filter(|s| !s.content.is_empty())
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    fn finish(&self, rendered: &str, drop_order: &[&str]) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes, drop_order);
        render_sections(&sections)
    }

    /// Prompt asking the generator to compile one task into a YAML document.
    pub fn compile_task(&self, task: &TaskContext) -> Result<String> {
        let actions: Vec<&str> = ActionKind::ALL.iter().map(|k| k.signature()).collect();
        let rendered = ENGINE.render(
            "compile_task",
            context! {
                task_num => task.task_num,
                task => task.task.trim(),
                first_task => task.first_task,
                start_seq => task.start_seq,
                hints => &task.hints,
                previous_outcomes => &task.previous_outcomes,
                actions => actions,
            },
        )?;
        Ok(self.finish(&rendered, &["hints"]))
    }

    /// Prompt asking the generator to approve or correct a compiled document.
    pub fn review_task(&self, task: &TaskContext, draft: &str) -> Result<String> {
        let actions: Vec<&str> = ActionKind::ALL.iter().map(|k| k.signature()).collect();
        let rendered = ENGINE.render(
            "review_task",
            context! {
                task_num => task.task_num,
                task => task.task.trim(),
                start_seq => task.start_seq,
                previous_outcomes => &task.previous_outcomes,
                actions => actions,
                draft => draft.trim(),
            },
        )?;
        Ok(self.finish(&rendered, &[]))
    }

    /// Yes/no question for a branch condition.
    pub fn branch(&self, condition: &str) -> Result<String> {
        let rendered = ENGINE.render(
            "branch",
            context! { condition => condition.trim() },
        )?;
        Ok(self.finish(&rendered, &[]))
    }

    /// Next-action prompt for the control loop.
    pub fn interpreter(&self, hints: &HintContext) -> Result<String> {
        let rendered = ENGINE.render(
            "interpreter",
            context! {
                goal => hints.goal.trim(),
                hints => (!hints.hints.trim().is_empty()).then(|| hints.hints.trim()),
                goal_changed => hints.goal_changed,
            },
        )?;
        Ok(self.finish(&rendered, &["goal_changed"]))
    }

    /// Ask for a goal that matches a user's requested plan change.
    pub fn revise_goal(&self, goal: &str, plan: &[String], changes: &str) -> Result<String> {
        let rendered = ENGINE.render(
            "revise_goal",
            context! {
                goal => goal.trim(),
                plan => plan,
                changes => changes.trim(),
            },
        )?;
        Ok(self.finish(&rendered, &[]))
    }
}
