//! Instruction interpreter for compiled tasks.
//!
//! Runs an instruction list with a local program counter. Branches ask the
//! generator a yes/no question and run the chosen arm as a nested sequence;
//! every other instruction is substituted, validated into an [`Action`] and
//! dispatched. A `Shutdown` anywhere stops the whole run.

use tracing::{debug, info, instrument, warn};

use crate::actions::{Action, Toolbox};
use crate::core::types::BranchAnswer;
use crate::core::variables::{VariableStore, apply_writes, substitute_args, substitute_text};
use crate::io::generator::{GenerateRequest, GenerationPurpose};
use crate::io::prompt::PromptBuilder;
use crate::plan::Instruction;

/// One dispatched instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedInstruction {
    pub seq: i64,
    pub description: String,
    pub output: String,
    /// Keys written by `SET` statements in the output.
    pub writes: Vec<String>,
}

/// An instruction that failed validation and was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedInstruction {
    pub seq: i64,
    pub type_tag: String,
    pub diagnostic: String,
}

/// A branch decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDecision {
    pub seq: i64,
    pub condition: String,
    pub taken: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub executed: Vec<ExecutedInstruction>,
    pub skipped: Vec<SkippedInstruction>,
    pub branches: Vec<BranchDecision>,
    /// Summary of the `Shutdown` that stopped the run, if any.
    pub shutdown: Option<String>,
}

impl RunReport {
    pub fn stopped(&self) -> bool {
        self.shutdown.is_some()
    }
}

/// Substitution, validation and dispatch for a single instruction.
pub struct InstructionVm<'a> {
    toolbox: &'a Toolbox<'a>,
    prompts: &'a PromptBuilder,
}

impl<'a> InstructionVm<'a> {
    pub fn new(toolbox: &'a Toolbox<'a>, prompts: &'a PromptBuilder) -> Self {
        Self { toolbox, prompts }
    }

    /// Execute `instructions` in order against `variables`.
    #[instrument(skip_all, fields(instructions = instructions.len()))]
    pub fn run(&self, instructions: &[Instruction], variables: &mut VariableStore) -> RunReport {
        let mut report = RunReport::default();
        self.run_nested(instructions, variables, &mut report);
        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            shutdown = report.stopped(),
            "instruction run finished"
        );
        report
    }

    fn run_nested(
        &self,
        instructions: &[Instruction],
        variables: &mut VariableStore,
        report: &mut RunReport,
    ) {
        let mut pc = 0;
        while pc < instructions.len() {
            let instruction = &instructions[pc];
            pc += 1;

            if instruction.is_branch() {
                let taken = self.decide_branch(instruction, variables, report);
                let arm = if taken {
                    instruction.then_branch.as_deref()
                } else {
                    instruction.else_branch.as_deref()
                };
                if let Some(arm) = arm {
                    self.run_nested(arm, variables, report);
                }
            } else {
                self.step(instruction, variables, report);
            }

            if report.stopped() {
                return;
            }
        }
    }

    fn step(&self, instruction: &Instruction, variables: &mut VariableStore, report: &mut RunReport) {
        let args = substitute_args(&instruction.args, variables);
        let action = match Action::from_fields(&instruction.type_tag, &args) {
            Ok(action) => action,
            Err(err) => {
                warn!(seq = instruction.seq, tag = %instruction.type_tag, err = %err, "skipping instruction");
                report.skipped.push(SkippedInstruction {
                    seq: instruction.seq,
                    type_tag: instruction.type_tag.clone(),
                    diagnostic: err.to_string(),
                });
                return;
            }
        };

        let description = action.describe();
        debug!(seq = instruction.seq, action = %description, "dispatching");
        let output = dispatch(&action, self.toolbox, variables);
        let writes = apply_writes(&output, variables);
        if let Action::Shutdown { summary } = &action {
            report.shutdown = Some(summary.clone());
        }
        report.executed.push(ExecutedInstruction {
            seq: instruction.seq,
            description,
            output,
            writes,
        });
    }

    /// Ask the generator whether the condition holds. Anything but a clean
    /// `{"result": bool}` answer counts as false.
    fn decide_branch(
        &self,
        instruction: &Instruction,
        variables: &VariableStore,
        report: &mut RunReport,
    ) -> bool {
        let condition = substitute_text(instruction.condition().unwrap_or_default(), variables);
        let (taken, reason) = if condition.trim().is_empty() {
            warn!(seq = instruction.seq, "branch without condition; taking else");
            (false, None)
        } else {
            self.ask_condition(&condition)
        };
        info!(seq = instruction.seq, taken, "branch decided");
        report.branches.push(BranchDecision {
            seq: instruction.seq,
            condition,
            taken,
            reason,
        });
        taken
    }

    fn ask_condition(&self, condition: &str) -> (bool, Option<String>) {
        let prompt = match self.prompts.branch(condition) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %err, "render branch prompt failed; taking else");
                return (false, None);
            }
        };
        let request = GenerateRequest::new(GenerationPurpose::Branch, prompt);
        match self.toolbox.generator.generate(&request) {
            Ok(answer) => match BranchAnswer::parse(&answer) {
                Some(answer) => (answer.result, answer.reason),
                None => {
                    warn!(answer = %answer.trim(), "unparsable branch answer; taking else");
                    (false, None)
                }
            },
            Err(err) => {
                warn!(err = %err, "branch generation failed; taking else");
                (false, None)
            }
        }
    }
}

/// Run one action and return its output. Shared by the VM and the control loop.
pub fn dispatch(action: &Action, toolbox: &Toolbox<'_>, variables: &mut VariableStore) -> String {
    action.run(toolbox, variables)
}
