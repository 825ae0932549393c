//! Interactive control loop for `jarvis run`.
//!
//! Each iteration renders the interpreter prompt from the current
//! [`HintContext`], asks the generator for one action, confirms it with the
//! user, runs it, and checkpoints the resulting hints. The context is passed in
//! and handed back explicitly; nothing else carries state between iterations.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::actions::{Action, Toolbox};
use crate::core::response_parser;
use crate::core::types::{HintContext, Metadata};
use crate::core::variables::{VariableStore, apply_writes};
use crate::error::{JarvisError, kind_of};
use crate::io::checkpoint::CheckpointStore;
use crate::io::config::JarvisConfig;
use crate::io::confirm::Confirmer;
use crate::io::generator::{GenerateRequest, GenerationPurpose};
use crate::io::prompt::PromptBuilder;
use crate::io::variable_store::save_variables;
use crate::vm::dispatch;

/// Loop knobs, usually taken from `JarvisConfig` plus CLI overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub confirm_timeout: Duration,
    pub continuous: bool,
    pub run_on_timeout: bool,
    pub change_plan_on_timeout: bool,
    pub backoff: Duration,
    /// Log every raw response at info level.
    pub verbose: bool,
}

impl LoopSettings {
    pub fn from_config(cfg: &JarvisConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            confirm_timeout: Duration::from_secs(cfg.confirm_timeout_secs),
            continuous: cfg.continuous,
            run_on_timeout: cfg.run_on_timeout,
            change_plan_on_timeout: cfg.change_plan_on_timeout,
            backoff: Duration::from_millis(cfg.backoff_ms),
            verbose: cfg.verbose,
        }
    }
}

/// Reason why `ControlLoop::run` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The generator chose `SHUTDOWN`.
    Shutdown { summary: String },
    /// The user declined to run the proposed action.
    Declined,
    /// The configured iteration limit was reached.
    MaxIterations { iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
    pub context: HintContext,
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    Continue(HintContext),
    Stop(LoopStop, HintContext),
}

pub struct ControlLoop<'a> {
    toolbox: &'a Toolbox<'a>,
    prompts: &'a PromptBuilder,
    confirmer: &'a dyn Confirmer,
    checkpoint: Option<&'a CheckpointStore>,
    /// Persist variables here after every executed action.
    variables_path: Option<&'a Path>,
    settings: LoopSettings,
}

impl<'a> ControlLoop<'a> {
    pub fn new(
        toolbox: &'a Toolbox<'a>,
        prompts: &'a PromptBuilder,
        confirmer: &'a dyn Confirmer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            toolbox,
            prompts,
            confirmer,
            checkpoint: None,
            variables_path: None,
            settings,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: &'a CheckpointStore) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_variables_path(mut self, path: &'a Path) -> Self {
        self.variables_path = Some(path);
        self
    }

    /// Iterate until shutdown, a declined action, or the iteration limit.
    ///
    /// Generation and parse failures never stop the loop; only prompt
    /// rendering errors propagate.
    #[instrument(skip_all, fields(max_iterations = self.settings.max_iterations))]
    pub fn run(&self, context: HintContext, variables: &mut VariableStore) -> Result<LoopOutcome> {
        let mut context = context;
        let mut iterations = 0u32;
        while iterations < self.settings.max_iterations {
            iterations += 1;
            debug!(iteration = iterations, "iteration start");
            match self.iterate(context, variables)? {
                Iteration::Continue(next) => context = next,
                Iteration::Stop(stop, last) => {
                    info!(iterations, stop = ?stop, "loop stopped");
                    return Ok(LoopOutcome {
                        iterations,
                        stop,
                        context: last,
                    });
                }
            }
        }
        warn!(iterations, "iteration limit reached");
        Ok(LoopOutcome {
            iterations,
            stop: LoopStop::MaxIterations { iterations },
            context,
        })
    }

    /// Run one iteration and return the context for the next one.
    pub fn iterate(&self, mut context: HintContext, variables: &mut VariableStore) -> Result<Iteration> {
        let prompt = self.prompts.interpreter(&context)?;
        let request = GenerateRequest::new(GenerationPurpose::Interpret, prompt);
        let response = match self.toolbox.generator.generate(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "generation failed; backing off");
                thread::sleep(self.settings.backoff);
                return Ok(Iteration::Continue(context));
            }
        };
        if self.settings.verbose {
            info!(response = %response, "assistant response");
        }

        let (action, metadata) = match response_parser::parse(&response) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(err = %err, "response did not parse");
                context.hints = corrective_hint(&err, &response);
                return Ok(Iteration::Continue(context));
            }
        };

        if let Action::Shutdown { summary } = &action {
            info!("shutting down");
            if !summary.is_empty() {
                println!("{summary}");
            }
            return Ok(Iteration::Stop(
                LoopStop::Shutdown {
                    summary: summary.clone(),
                },
                context,
            ));
        }

        if let Some(speak) = metadata.speak.as_deref().filter(|s| !s.trim().is_empty()) {
            println!("{speak}");
        }
        println!("Next action: {}", action.describe());
        if !self.settings.continuous
            && !self.confirmer.confirm(
                "Run the action? [Y/n]",
                self.settings.confirm_timeout,
                self.settings.run_on_timeout,
            )
        {
            info!("action declined");
            return Ok(Iteration::Stop(LoopStop::Declined, context));
        }

        let output = dispatch(&action, self.toolbox, variables);
        info!(action = %action.describe(), output_bytes = output.len(), "action executed");
        let written = apply_writes(&output, variables);
        if !written.is_empty() {
            debug!(keys = ?written, "variables written");
        }
        self.persist_variables(variables);

        context.hints = make_hints(&metadata, &action, &output);
        context.goal_changed = false;
        self.save_checkpoint(&context, &response);

        if !metadata.plan.is_empty() {
            println!("\nCurrent plan:");
            for step in &metadata.plan {
                println!("  - {step}");
            }
        }
        if !self.settings.continuous {
            context = self.offer_plan_change(context, &metadata);
            if context.goal_changed {
                self.save_checkpoint(&context, &response);
            }
        }
        Ok(Iteration::Continue(context))
    }

    fn persist_variables(&self, variables: &VariableStore) {
        if let Some(path) = self.variables_path
            && let Err(err) = save_variables(path, variables)
        {
            warn!(err = %format!("{err:#}"), "failed to persist variables");
        }
    }

    fn save_checkpoint(&self, context: &HintContext, response: &str) {
        let Some(store) = self.checkpoint else {
            return;
        };
        match store.save(&context.hints, &context.goal, response) {
            Ok(()) => debug!("checkpoint saved"),
            Err(err) => warn!(err = %err, "checkpoint not saved; continuing"),
        }
    }

    fn offer_plan_change(&self, mut context: HintContext, metadata: &Metadata) -> HintContext {
        let timeout = self.settings.confirm_timeout;
        if !self.confirmer.confirm(
            "Change the proposed plan? [N/y]",
            timeout,
            self.settings.change_plan_on_timeout,
        ) {
            return context;
        }
        let Some(changes) = self.confirmer.ask("Changes you want to make:", timeout) else {
            info!("no plan change given; continuing with the current plan");
            return context;
        };

        let revised = self
            .prompts
            .revise_goal(&context.goal, &metadata.plan, &changes)
            .and_then(|prompt| {
                self.toolbox
                    .generator
                    .generate(&GenerateRequest::new(GenerationPurpose::ReviseGoal, prompt))
            });
        match revised {
            Ok(goal) if !goal.trim().is_empty() => {
                info!(goal = %goal.trim(), "goal revised");
                context.goal = goal.trim().to_string();
                context.goal_changed = true;
            }
            Ok(_) => warn!("goal revision came back empty; keeping the current goal"),
            Err(err) => {
                let generation = kind_of(&err).is_some_and(JarvisError::is_generation);
                warn!(err = %format!("{err:#}"), generation, "goal revision failed; keeping the current goal");
            }
        }
        context
    }
}

/// Starting context: the checkpointed one unless a new goal is given.
pub fn initial_context(
    checkpoint: Option<&CheckpointStore>,
    goal: Option<String>,
) -> Result<Option<HintContext>> {
    if let Some(goal) = goal {
        return Ok(Some(HintContext::new(goal)));
    }
    let Some(store) = checkpoint else {
        return Ok(None);
    };
    match store.load() {
        Ok(Some(cp)) => {
            info!(saved_at = %cp.timestamp, "resuming from checkpoint");
            Ok(Some(HintContext {
                goal: cp.goal,
                hints: cp.hint_state,
                goal_changed: false,
            }))
        }
        Ok(None) => Ok(None),
        Err(err) => {
            warn!(err = %err, "checkpoint unreadable; starting fresh");
            Ok(None)
        }
    }
}

/// Hints for the next prompt: the previous plan and the action's result.
pub fn make_hints(metadata: &Metadata, action: &Action, output: &str) -> String {
    let mut hints = String::new();
    if !metadata.plan.is_empty() {
        hints.push_str("## The previous plan:\n");
        for step in &metadata.plan {
            hints.push_str(&format!("  - {step}\n"));
        }
        hints.push('\n');
    }
    hints.push_str("## I executed the action you required, below are the results:\n");
    if let Some(task_id) = &metadata.current_task_id {
        hints.push_str(&format!("- Task ID: {task_id}\n"));
    }
    hints.push_str(&format!("- Action: ***{}***\n", action.describe()));
    hints.push_str(&format!("- Action Results:\n{}\n", output.trim_end()));
    hints.push_str("## end of action results\n");
    hints
}

fn corrective_hint(err: &JarvisError, response: &str) -> String {
    format!(
        "Your previous response could not be parsed ({err}). Start with exactly one \
         action line from the response format, then the JSON metadata. Please review:\n{}",
        response.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedConfirmer, ScriptedGenerator, StaticTools, StubSandbox};

    fn settings() -> LoopSettings {
        LoopSettings {
            max_iterations: 5,
            confirm_timeout: Duration::from_millis(10),
            continuous: false,
            run_on_timeout: true,
            change_plan_on_timeout: false,
            backoff: Duration::ZERO,
            verbose: false,
        }
    }

    struct Harness {
        temp: tempfile::TempDir,
        generator: ScriptedGenerator,
        tools: StaticTools,
        sandbox: StubSandbox,
        prompts: PromptBuilder,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                temp: tempfile::tempdir().expect("tempdir"),
                generator: ScriptedGenerator::new(),
                tools: StaticTools::default(),
                sandbox: StubSandbox::default(),
                prompts: PromptBuilder::new(100_000),
            }
        }

        fn toolbox(&self) -> Toolbox<'_> {
            Toolbox {
                workspace: self.temp.path(),
                generator: &self.generator,
                search: &self.tools,
                extractor: &self.tools,
                sandbox: &self.sandbox,
                default_code_timeout: Duration::from_secs(5),
                max_code_timeout: Duration::from_secs(60),
            }
        }
    }

    /// Verifies an action runs, hints carry its result, and the checkpoint is saved.
    #[test]
    fn executes_action_then_stops_on_shutdown() {
        let h = Harness::new();
        h.generator.push(
            GenerationPurpose::Interpret,
            Ok("WRITE_FILE: note.txt\n```\nhello\n```\n{\"plan\":[\"[working] 1. write note\"],\"current_task_id\":\"1\",\"reason\":\"start\"}"),
        );
        h.generator.push(GenerationPurpose::Interpret, Ok("SHUTDOWN: wrote the note"));
        let confirmer = ScriptedConfirmer::new(&[true, false]);
        let checkpoint = CheckpointStore::open_in_memory().expect("checkpoint");
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(&toolbox, &h.prompts, &confirmer, settings())
            .with_checkpoint(&checkpoint)
            .run(HintContext::new("write a note"), &mut vars)
            .expect("run");

        assert_eq!(
            outcome.stop,
            LoopStop::Shutdown {
                summary: "wrote the note".to_string()
            }
        );
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            std::fs::read_to_string(h.temp.path().join("note.txt")).expect("read"),
            "hello"
        );

        let cp = checkpoint.load().expect("load").expect("saved");
        assert_eq!(cp.goal, "write a note");
        assert!(cp.hint_state.contains("[working] 1. write note"));
        assert!(cp.hint_state.contains("wrote 5 bytes to note.txt"));

        let second_prompt = &h.generator.prompts(GenerationPurpose::Interpret)[1];
        assert!(second_prompt.contains("- Task ID: 1"));
    }

    /// Verifies a parse failure feeds a corrective hint into the next prompt.
    #[test]
    fn parse_error_injects_corrective_hint() {
        let h = Harness::new();
        h.generator.push(GenerationPurpose::Interpret, Ok("I think we should search"));
        h.generator.push(GenerationPurpose::Interpret, Ok("SHUTDOWN"));
        let confirmer = ScriptedConfirmer::new(&[]);
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(&toolbox, &h.prompts, &confirmer, settings())
            .run(HintContext::new("goal"), &mut vars)
            .expect("run");

        assert!(matches!(outcome.stop, LoopStop::Shutdown { .. }));
        let prompts = h.generator.prompts(GenerationPurpose::Interpret);
        assert!(prompts[1].contains("could not be parsed"));
        assert!(prompts[1].contains("I think we should search"));
    }

    /// Verifies a generation failure does not advance the hints.
    #[test]
    fn generation_failure_retries_with_same_context() {
        let h = Harness::new();
        h.generator.push(GenerationPurpose::Interpret, Err("timeout"));
        h.generator.push(GenerationPurpose::Interpret, Ok("SHUTDOWN: ok"));
        let confirmer = ScriptedConfirmer::new(&[]);
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(&toolbox, &h.prompts, &confirmer, settings())
            .run(HintContext::new("goal"), &mut vars)
            .expect("run");

        assert_eq!(outcome.iterations, 2);
        let prompts = h.generator.prompts(GenerationPurpose::Interpret);
        assert_eq!(prompts[0], prompts[1]);
    }

    #[test]
    fn declined_action_stops_loop() {
        let h = Harness::new();
        h.generator.push(GenerationPurpose::Interpret, Ok("CREATE_DIRECTORY: out"));
        let confirmer = ScriptedConfirmer::new(&[false]);
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(&toolbox, &h.prompts, &confirmer, settings())
            .run(HintContext::new("goal"), &mut vars)
            .expect("run");

        assert_eq!(outcome.stop, LoopStop::Declined);
        assert!(!h.temp.path().join("out").exists());
    }

    #[test]
    fn stops_at_iteration_limit_in_continuous_mode() {
        let h = Harness::new();
        for _ in 0..3 {
            h.generator.push(GenerationPurpose::Interpret, Ok("MEMORY_SET: n, 1"));
        }
        let confirmer = ScriptedConfirmer::new(&[]);
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(
            &toolbox,
            &h.prompts,
            &confirmer,
            LoopSettings {
                max_iterations: 3,
                continuous: true,
                ..settings()
            },
        )
        .run(HintContext::new("goal"), &mut vars)
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::MaxIterations { iterations: 3 });
        assert_eq!(confirmer.asked(), 0);
        assert_eq!(vars.get("n"), Some(&serde_json::json!(1)));
    }

    /// Verifies a requested plan change revises the goal and flags it for the next prompt.
    #[test]
    fn plan_change_revises_goal() {
        let h = Harness::new();
        h.generator.push(
            GenerationPurpose::Interpret,
            Ok("TELL_USER: hi\n{\"plan\":[\"[working] 1. greet\"],\"reason\":\"r\"}"),
        );
        h.generator.push(GenerationPurpose::ReviseGoal, Ok("greet in French\n"));
        h.generator.push(GenerationPurpose::Interpret, Ok("SHUTDOWN"));
        let confirmer = ScriptedConfirmer::new(&[true, true]).with_answers(&["use French"]);
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(&toolbox, &h.prompts, &confirmer, settings())
            .run(HintContext::new("greet"), &mut vars)
            .expect("run");

        assert_eq!(outcome.context.goal, "greet in French");
        let revise = &h.generator.prompts(GenerationPurpose::ReviseGoal)[0];
        assert!(revise.contains("use French"));
        assert!(revise.contains("- [working] 1. greet"));
        let next = &h.generator.prompts(GenerationPurpose::Interpret)[1];
        assert!(next.contains("### Goal Changed"));
        assert!(next.contains("greet in French"));
    }

    /// Verifies a revised goal is checkpointed within the iteration that revised it.
    #[test]
    fn revised_goal_is_checkpointed_immediately() {
        let h = Harness::new();
        h.generator.push(GenerationPurpose::Interpret, Ok("TELL_USER: hi"));
        h.generator.push(GenerationPurpose::ReviseGoal, Ok("greet in French"));
        let confirmer = ScriptedConfirmer::new(&[true, true]).with_answers(&["use French"]);
        let checkpoint = CheckpointStore::open_in_memory().expect("checkpoint");
        let toolbox = h.toolbox();

        let mut vars = VariableStore::new();
        let outcome = ControlLoop::new(
            &toolbox,
            &h.prompts,
            &confirmer,
            LoopSettings {
                max_iterations: 1,
                ..settings()
            },
        )
        .with_checkpoint(&checkpoint)
        .run(HintContext::new("greet"), &mut vars)
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::MaxIterations { iterations: 1 });
        let cp = checkpoint.load().expect("load").expect("saved");
        assert_eq!(cp.goal, "greet in French");
        assert!(cp.hint_state.contains("told user: hi"));
    }

    #[test]
    fn initial_context_prefers_explicit_goal_then_checkpoint() {
        let checkpoint = CheckpointStore::open_in_memory().expect("checkpoint");
        assert_eq!(initial_context(Some(&checkpoint), None).expect("ctx"), None);

        checkpoint.save("saved hints", "saved goal", "raw").expect("save");
        let resumed = initial_context(Some(&checkpoint), None)
            .expect("ctx")
            .expect("resumed");
        assert_eq!(resumed.goal, "saved goal");
        assert_eq!(resumed.hints, "saved hints");

        let fresh = initial_context(Some(&checkpoint), Some("new goal".to_string()))
            .expect("ctx")
            .expect("fresh");
        assert_eq!(fresh, HintContext::new("new goal"));
    }
}
