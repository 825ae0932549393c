//! Plan compiler: one generation call per task, persisted outcomes, and
//! recompilation from an arbitrary task.
//!
//! Tasks compile in declaration order, which must be a topological order: a
//! task whose dependency has no cached outcome yet fails the whole compilation
//! with `JarvisError::Dependency`.
//!
//! Each generated document then goes through a review call that either
//! approves it or returns a corrected document. A failed review call or an
//! undecodable correction keeps the original.
//!
//! Recompiling task N always regenerates N. Later tasks are regenerated only
//! when N's `overall_outcome` changed (or N had no previous outcome); this is
//! coarse on purpose and ignores the later tasks' own dependency sets.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::JarvisError;
use crate::io::generator::{GenerateRequest, GenerationPurpose, Generator};
use crate::io::outcome_store::{OutcomeStore, decode_outcome, strip_fences};
use crate::io::prompt::PromptBuilder;
use crate::plan::{Plan, PreviousOutcome, Task, TaskOutcome};

/// Everything the generator sees about one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskContext {
    pub first_task: bool,
    pub task_num: i64,
    pub hints: Vec<String>,
    pub task: String,
    /// First sequence number reserved for this task's instructions.
    pub start_seq: i64,
    pub previous_outcomes: Vec<PreviousOutcome>,
}

impl TaskContext {
    pub fn new(
        task_num: i64,
        task: impl Into<String>,
        hints: &[String],
        previous_outcomes: Vec<PreviousOutcome>,
    ) -> Self {
        Self {
            first_task: task_num == 1,
            task_num,
            hints: hints.to_vec(),
            task: task.into(),
            start_seq: start_seq(task_num),
            previous_outcomes,
        }
    }
}

/// Each task owns a block of 16 sequence numbers: task 1 starts at 1, task 2 at 17.
pub fn start_seq(task_num: i64) -> i64 {
    (task_num.saturating_sub(1) << 4) + 1
}

/// Reviewer answers that keep the draft as generated.
fn is_approval(answer: &str) -> bool {
    answer
        .trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '.'))
        .eq_ignore_ascii_case("approved")
}

pub struct PlanCompiler<'a> {
    generator: &'a dyn Generator,
    store: &'a OutcomeStore,
    prompts: &'a PromptBuilder,
    review: bool,
}

impl<'a> PlanCompiler<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        store: &'a OutcomeStore,
        prompts: &'a PromptBuilder,
    ) -> Self {
        Self {
            generator,
            store,
            prompts,
            review: true,
        }
    }

    /// Enable or skip the review call after each generation.
    pub fn with_review(mut self, review: bool) -> Self {
        self.review = review;
        self
    }

    /// Compile every task in declaration order.
    #[instrument(skip_all, fields(tasks = plan.task_list.len()))]
    pub fn compile_plan(&self, plan: &Plan) -> Result<Vec<TaskOutcome>> {
        let mut cache = BTreeMap::new();
        let mut result = Vec::with_capacity(plan.task_list.len());

        for task in plan.tasks() {
            let previous = resolve_dependencies(&task, &cache)?;
            let outcome = self.compile_task(
                task.task_num,
                &task.description,
                &plan.hints_from_user,
                previous,
            )?;
            cache.insert(task.task_num, outcome.summary());
            result.push(outcome);
        }

        info!(compiled = result.len(), "plan compiled");
        Ok(result)
    }

    /// Recompile starting from `target`, reusing cached outcomes where the
    /// invalidation policy allows.
    #[instrument(skip_all, fields(target = target))]
    pub fn compile_task_in_plan(&self, plan: &Plan, target: i64) -> Result<Vec<TaskOutcome>> {
        if !plan.task_list.iter().any(|t| t.task_num == target) {
            return Err(JarvisError::validation(format!("task {target} is not in the plan")).into());
        }

        let mut cache = BTreeMap::new();
        let mut result = Vec::with_capacity(plan.task_list.len());
        let mut recompile_rest = false;

        for task in plan.tasks() {
            let num = task.task_num;
            let previous = resolve_dependencies(&task, &cache)?;
            let cached = self.load_cached(num)?;

            let reuse = if num == target || (num > target && recompile_rest) {
                None
            } else {
                cached.clone()
            };
            let outcome = match reuse {
                Some(outcome) => {
                    debug!(task_num = num, "reusing cached outcome");
                    outcome
                }
                None => self.compile_task(num, &task.description, &plan.hints_from_user, previous)?,
            };

            if num == target {
                recompile_rest = cached
                    .as_ref()
                    .is_none_or(|origin| origin.overall_outcome != outcome.overall_outcome);
                info!(
                    task_num = num,
                    recompile_rest, "target recompiled"
                );
            }

            cache.insert(num, outcome.summary());
            result.push(outcome);
        }

        Ok(result)
    }

    /// Compile one task without consulting the plan or the cache.
    ///
    /// The outcome is persisted only after it decodes and validates.
    #[instrument(skip_all, fields(task_num = task_num))]
    pub fn compile_task(
        &self,
        task_num: i64,
        task: &str,
        hints: &[String],
        previous_outcomes: Vec<PreviousOutcome>,
    ) -> Result<TaskOutcome> {
        let ctx = TaskContext::new(task_num, task, hints, previous_outcomes);
        let prompt = self.prompts.compile_task(&ctx)?;
        let raw = self
            .generator
            .generate(&GenerateRequest::new(GenerationPurpose::Compile, prompt))
            .with_context(|| format!("generate instructions for task {task_num}"))?;

        let draft =
            decode_outcome(&raw).with_context(|| format!("decode outcome for task {task_num}"))?;
        let (raw, mut outcome) = if self.review {
            self.review_draft(&ctx, raw, draft)?
        } else {
            (raw, draft)
        };
        if outcome.task_num != task_num {
            warn!(
                expected = task_num,
                got = outcome.task_num,
                "generator returned a different task_num; keeping the requested one"
            );
            outcome.task_num = task_num;
        }

        self.store
            .write_raw(task_num, &raw)
            .with_context(|| format!("persist outcome for task {task_num}"))?;
        info!(
            task_num,
            instructions = outcome.instructions.len(),
            "task compiled"
        );
        Ok(outcome)
    }

    /// Ask the generator to approve `raw` or replace it.
    fn review_draft(
        &self,
        ctx: &TaskContext,
        raw: String,
        draft: TaskOutcome,
    ) -> Result<(String, TaskOutcome)> {
        let task_num = ctx.task_num;
        let prompt = self.prompts.review_task(ctx, strip_fences(&raw))?;
        let answer = match self
            .generator
            .generate(&GenerateRequest::new(GenerationPurpose::Review, prompt))
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!(task_num, err = %format!("{err:#}"), "review failed; keeping draft");
                return Ok((raw, draft));
            }
        };
        if is_approval(&answer) {
            debug!(task_num, "draft approved");
            return Ok((raw, draft));
        }
        match decode_outcome(&answer) {
            Ok(revised) => {
                info!(
                    task_num,
                    before = draft.instructions.len(),
                    after = revised.instructions.len(),
                    "review replaced the draft"
                );
                Ok((answer, revised))
            }
            Err(err) => {
                warn!(task_num, err = %err, "review answer did not decode; keeping draft");
                Ok((raw, draft))
            }
        }
    }

    /// Cached outcome for `task_num`; an undecodable file counts as missing.
    fn load_cached(&self, task_num: i64) -> Result<Option<TaskOutcome>> {
        match self.store.load(task_num) {
            Ok(Some(mut outcome)) => {
                outcome.task_num = task_num;
                Ok(Some(outcome))
            }
            Ok(None) => Ok(None),
            Err(err) if crate::error::kind_of(&err).is_some_and(JarvisError::is_parse) => {
                warn!(task_num, err = %format!("{err:#}"), "cached outcome is unreadable; recompiling");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn resolve_dependencies(
    task: &Task,
    cache: &BTreeMap<i64, PreviousOutcome>,
) -> Result<Vec<PreviousOutcome>, JarvisError> {
    task.dependencies
        .iter()
        .map(|dep| {
            cache.get(dep).cloned().ok_or(JarvisError::Dependency {
                task_num: task.task_num,
                missing: *dep,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use crate::test_support::{ScriptedGenerator, outcome_yaml, plan_with};

    #[test]
    fn start_seq_reserves_blocks_of_sixteen() {
        assert_eq!(start_seq(1), 1);
        assert_eq!(start_seq(2), 17);
        assert_eq!(start_seq(3), 33);
        assert_eq!(start_seq(i64::MIN), (i64::MIN << 4) + 1);
    }

    #[test]
    fn approval_tolerates_case_and_quoting() {
        assert!(is_approval("approved"));
        assert!(is_approval("  Approved.\n"));
        assert!(is_approval("`APPROVED`"));
        assert!(!is_approval("approved, but seq 2 is wrong"));
    }

    /// Verifies an approved draft is persisted unchanged.
    #[test]
    fn approved_review_keeps_draft() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        let draft = outcome_yaml(1, "search", "urls saved");
        generator.push(GenerationPurpose::Compile, Ok(draft.as_str()));
        generator.push(GenerationPurpose::Review, Ok("approved\n"));

        let outcome = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task(1, "search", &[], Vec::new())
            .expect("compile");
        assert_eq!(outcome.overall_outcome, "urls saved");
        assert_eq!(store.load_raw(1).expect("load"), Some(draft.clone()));
        let review_prompt = &generator.prompts(GenerationPurpose::Review)[0];
        assert!(review_prompt.contains("overall_outcome: \"urls saved\""));
    }

    /// Verifies a corrected document replaces the draft on disk.
    #[test]
    fn revised_review_replaces_draft() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "search", "urls saved").as_str()));
        let revised = format!("```yaml\n{}```", outcome_yaml(1, "search", "urls saved under key urls"));
        generator.push(GenerationPurpose::Review, Ok(revised.as_str()));

        let outcome = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task(1, "search", &[], Vec::new())
            .expect("compile");
        assert_eq!(outcome.overall_outcome, "urls saved under key urls");
        let cached = store.load(1).expect("load").expect("cached");
        assert_eq!(cached.overall_outcome, "urls saved under key urls");
    }

    /// Verifies an unusable review answer falls back to the draft.
    #[test]
    fn undecodable_review_keeps_draft() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "a", "draft").as_str()));
        generator.push(GenerationPurpose::Review, Ok("Looks mostly fine to me."));

        let outcome = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task(1, "a", &[], Vec::new())
            .expect("compile");
        assert_eq!(outcome.overall_outcome, "draft");
    }

    #[test]
    fn review_can_be_disabled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "a", "x").as_str()));

        PlanCompiler::new(&generator, &store, &prompts)
            .with_review(false)
            .compile_task(1, "a", &[], Vec::new())
            .expect("compile");
        assert_eq!(generator.calls(GenerationPurpose::Review), 0);
    }

    /// Verifies dependency outcomes are handed to dependents in the prompt.
    #[test]
    fn compile_plan_passes_dependency_outcomes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "search", "urls saved").as_str()));
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(2, "report", "report written").as_str()));

        let plan = plan_with(&[(1, "search"), (2, "report")], &[(2, vec![1])]);
        let outcomes = PlanCompiler::new(&generator, &store, &prompts)
            .compile_plan(&plan)
            .expect("compile");

        assert_eq!(outcomes.len(), 2);
        let sent = generator.prompts(GenerationPurpose::Compile);
        assert!(sent[1].contains("task 1 (search): urls saved"));
        assert!(sent[1].contains("seq: 17"));
        assert!(store.path(1).is_file() && store.path(2).is_file());
    }

    /// Verifies a forward dependency is fatal and names both tasks.
    #[test]
    fn forward_dependency_is_dependency_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "a", "x").as_str()));

        let plan = plan_with(&[(1, "a"), (2, "b")], &[(1, vec![2])]);
        let err = PlanCompiler::new(&generator, &store, &prompts)
            .compile_plan(&plan)
            .unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(JarvisError::Dependency {
                task_num: 1,
                missing: 2
            })
        ));
        assert_eq!(generator.calls(GenerationPurpose::Compile), 0);
    }

    /// Verifies an invalid document is reported and nothing is persisted.
    #[test]
    fn invalid_document_is_not_persisted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok("not: [a, task"));

        let err = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task(1, "a", &[], Vec::new())
            .unwrap_err();
        assert!(kind_of(&err).is_some_and(JarvisError::is_parse));
        assert!(!store.path(1).exists());
    }

    /// Verifies a generator failure surfaces as a generation error.
    #[test]
    fn generator_failure_is_generation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Err("rate limited"));

        let err = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task(1, "a", &[], Vec::new())
            .unwrap_err();
        assert!(kind_of(&err).is_some_and(JarvisError::is_generation));
    }

    #[test]
    fn mismatched_task_num_is_overridden() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(9, "a", "x").as_str()));

        let outcome = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task(4, "a", &[], Vec::new())
            .expect("compile");
        assert_eq!(outcome.task_num, 4);
        assert!(store.path(4).is_file());
    }

    #[test]
    fn unknown_target_is_validation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OutcomeStore::new(temp.path());
        let prompts = PromptBuilder::new(100_000);
        let generator = ScriptedGenerator::new();
        let plan = plan_with(&[(1, "a")], &[]);
        let err = PlanCompiler::new(&generator, &store, &prompts)
            .compile_task_in_plan(&plan, 7)
            .unwrap_err();
        assert!(matches!(kind_of(&err), Some(JarvisError::Validation(_))));
    }
}
