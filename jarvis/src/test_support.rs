//! Test-only builders and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::error::JarvisError;
use crate::io::confirm::Confirmer;
use crate::io::generator::{GenerateRequest, GenerationPurpose, Generator};
use crate::io::init::{InitOptions, JarvisPaths, init_workspace};
use crate::io::sandbox::{Sandbox, SandboxOutput, SandboxRequest};
use crate::io::tools::{Extractor, WebSearch};
use crate::plan::{Instruction, Plan, PlanTask};

/// Build a plan from `(task_num, task)` pairs and `(task_num, deps)` entries.
pub fn plan_with(tasks: &[(i64, &str)], deps: &[(i64, Vec<i64>)]) -> Plan {
    Plan {
        hints_from_user: Vec::new(),
        task_list: tasks
            .iter()
            .map(|(task_num, task)| PlanTask {
                task_num: *task_num,
                task: task.to_string(),
            })
            .collect(),
        task_dependency: deps.iter().cloned().collect(),
    }
}

/// Unwrap a JSON object literal into an argument map.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Parse a YAML instruction list.
pub fn instructions(yaml: &str) -> Vec<Instruction> {
    serde_yaml::from_str(yaml).expect("instruction yaml")
}

/// A minimal valid task outcome document with one `TellUser` instruction.
pub fn outcome_yaml(task_num: i64, task: &str, outcome: &str) -> String {
    format!(
        "task_num: {task_num}\ntask: \"{task}\"\noverall_outcome: \"{outcome}\"\ninstructions:\n  - seq: {seq}\n    type: TellUser\n    args: {{ message: \"{task}\" }}\n",
        seq = crate::compiler::start_seq(task_num),
    )
}

/// Fresh `jarvis init` workspace in a temp dir. Keep the `TempDir` alive.
pub fn initialized_workspace() -> (tempfile::TempDir, JarvisPaths) {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
    (temp, paths)
}

/// Generator that replays queued responses per purpose and records prompts.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: RefCell<HashMap<GenerationPurpose, VecDeque<Result<String, String>>>>,
    prompts: RefCell<HashMap<GenerationPurpose, Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response; `Err` becomes a generation error.
    pub fn push(&self, purpose: GenerationPurpose, response: Result<&str, &str>) {
        self.responses
            .borrow_mut()
            .entry(purpose)
            .or_default()
            .push_back(response.map(str::to_string).map_err(str::to_string));
    }

    pub fn prompts(&self, purpose: GenerationPurpose) -> Vec<String> {
        self.prompts
            .borrow()
            .get(&purpose)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self, purpose: GenerationPurpose) -> usize {
        self.prompts.borrow().get(&purpose).map_or(0, Vec::len)
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        self.prompts
            .borrow_mut()
            .entry(request.purpose)
            .or_default()
            .push(request.prompt.clone());
        let next = self
            .responses
            .borrow_mut()
            .get_mut(&request.purpose)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(JarvisError::generation(msg).into()),
            None => Err(JarvisError::generation(format!(
                "no scripted {} response left",
                request.purpose.as_str()
            ))
            .into()),
        }
    }
}

/// Search and extraction returning fixed text.
#[derive(Default)]
pub struct StaticTools {
    pub search_result: String,
    pub extract_result: String,
    pub searches: Cell<usize>,
    pub extracts: Cell<usize>,
}

impl StaticTools {
    pub fn search_calls(&self) -> usize {
        self.searches.get()
    }

    pub fn extract_calls(&self) -> usize {
        self.extracts.get()
    }
}

impl WebSearch for StaticTools {
    fn search(&self, _query: &str) -> Result<String> {
        self.searches.set(self.searches.get() + 1);
        Ok(self.search_result.clone())
    }
}

impl Extractor for StaticTools {
    fn extract(&self, _url: &str, _instructions: &str) -> Result<String> {
        self.extracts.set(self.extracts.get() + 1);
        Ok(self.extract_result.clone())
    }
}

/// Sandbox that never spawns anything and reports a clean exit.
#[derive(Default)]
pub struct StubSandbox {
    output: String,
    requests: RefCell<Vec<SandboxRequest>>,
}

impl StubSandbox {
    pub fn with_output(output: &str) -> Self {
        Self {
            output: output.to_string(),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<SandboxRequest> {
        self.requests.borrow().clone()
    }
}

impl Sandbox for StubSandbox {
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxOutput> {
        self.requests.borrow_mut().push(request.clone());
        Ok(SandboxOutput {
            output: self.output.clone(),
            exit_code: Some(0),
            timed_out: false,
            timeout: request.timeout,
        })
    }
}

/// Confirmer that replays yes/no answers and free-text answers in order.
///
/// Once a queue runs dry the question's default (or `None`) is returned.
#[derive(Default)]
pub struct ScriptedConfirmer {
    confirms: RefCell<VecDeque<bool>>,
    answers: RefCell<VecDeque<String>>,
    asked: Cell<usize>,
}

impl ScriptedConfirmer {
    pub fn new(confirms: &[bool]) -> Self {
        Self {
            confirms: RefCell::new(confirms.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn with_answers(self, answers: &[&str]) -> Self {
        *self.answers.borrow_mut() = answers.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Number of yes/no questions asked so far.
    pub fn asked(&self) -> usize {
        self.asked.get()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, _question: &str, _timeout: Duration, default: bool) -> bool {
        self.asked.set(self.asked.get() + 1);
        self.confirms.borrow_mut().pop_front().unwrap_or(default)
    }

    fn ask(&self, _question: &str, _timeout: Duration) -> Option<String> {
        self.answers.borrow_mut().pop_front()
    }
}
