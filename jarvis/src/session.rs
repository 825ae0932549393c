//! Wires a `.jarvis/` workspace to its configured collaborators.
//!
//! CLI commands open a `Session` once and borrow everything else from it.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::actions::Toolbox;
use crate::compiler::PlanCompiler;
use crate::core::variables::VariableStore;
use crate::io::config::{JarvisConfig, load_config};
use crate::io::generator::{CommandGenerator, Generator};
use crate::io::init::JarvisPaths;
use crate::io::outcome_store::OutcomeStore;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::{ProcessSandbox, Sandbox};
use crate::io::tools::{CommandTool, Extractor, WebSearch};
use crate::io::variable_store::{load_variables, save_variables};
use crate::plan::TaskOutcome;
use crate::validate::load_valid_plan;
use crate::vm::{InstructionVm, RunReport};

pub struct Session {
    pub paths: JarvisPaths,
    pub config: JarvisConfig,
    pub prompts: PromptBuilder,
    pub outcomes: OutcomeStore,
    generator: Box<dyn Generator>,
    search: Box<dyn WebSearch>,
    extractor: Box<dyn Extractor>,
    sandbox: Box<dyn Sandbox>,
}

impl Session {
    /// Open an initialized workspace with command-backed collaborators.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = JarvisPaths::new(root);
        paths.ensure_initialized()?;
        let config = load_config(&paths.config_path).context("load config.toml")?;
        let generator = CommandGenerator::new(&config.generator, &paths.workspace_dir);
        let search = CommandTool::new(&config.tools, &paths.workspace_dir);
        let extractor = CommandTool::new(&config.tools, &paths.workspace_dir);
        let sandbox = ProcessSandbox::new(&config.sandbox);
        Ok(Self::with_collaborators(
            paths,
            config,
            Box::new(generator),
            Box::new(search),
            Box::new(extractor),
            Box::new(sandbox),
        ))
    }

    pub fn with_collaborators(
        paths: JarvisPaths,
        config: JarvisConfig,
        generator: Box<dyn Generator>,
        search: Box<dyn WebSearch>,
        extractor: Box<dyn Extractor>,
        sandbox: Box<dyn Sandbox>,
    ) -> Self {
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        let outcomes = OutcomeStore::new(paths.outcomes_dir(&config));
        Self {
            paths,
            config,
            prompts,
            outcomes,
            generator,
            search,
            extractor,
            sandbox,
        }
    }

    pub fn toolbox(&self) -> Toolbox<'_> {
        Toolbox {
            workspace: &self.paths.workspace_dir,
            generator: self.generator.as_ref(),
            search: self.search.as_ref(),
            extractor: self.extractor.as_ref(),
            sandbox: self.sandbox.as_ref(),
            default_code_timeout: Duration::from_secs(self.config.sandbox.default_timeout_secs),
            max_code_timeout: Duration::from_secs(self.config.sandbox.max_timeout_secs),
        }
    }

    fn compiler(&self) -> PlanCompiler<'_> {
        PlanCompiler::new(self.generator.as_ref(), &self.outcomes, &self.prompts)
            .with_review(self.config.review_compiled)
    }

    /// Compile every task of `plan.yaml`.
    pub fn compile(&self) -> Result<Vec<TaskOutcome>> {
        let plan = load_valid_plan(&self.paths.plan_path)?;
        self.compiler().compile_plan(&plan)
    }

    /// Recompile from `task_num` on.
    pub fn recompile(&self, task_num: i64) -> Result<Vec<TaskOutcome>> {
        let plan = load_valid_plan(&self.paths.plan_path)?;
        self.compiler().compile_task_in_plan(&plan, task_num)
    }

    /// Run a compiled task's instructions and persist the variable store.
    #[instrument(skip_all, fields(task_num = task_num))]
    pub fn exec(&self, task_num: i64) -> Result<RunReport> {
        let outcome = self
            .outcomes
            .load(task_num)?
            .ok_or_else(|| anyhow!("task {task_num} is not compiled (run `jarvis compile`)"))?;
        let mut variables = self.load_variables()?;

        let toolbox = self.toolbox();
        let report = InstructionVm::new(&toolbox, &self.prompts).run(&outcome.instructions, &mut variables);
        save_variables(&self.paths.variables_path, &variables)?;
        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            variables = variables.len(),
            "task executed"
        );
        Ok(report)
    }

    pub fn load_variables(&self) -> Result<VariableStore> {
        load_variables(&self.paths.variables_path)
    }
}
