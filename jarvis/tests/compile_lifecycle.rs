//! Compile and recompile scenarios over a persisted outcome cache.
//!
//! Each test compiles a plan, then recompiles one task with a scripted
//! response and checks which outcome files were regenerated.

use std::fs;

use jarvis::compiler::PlanCompiler;
use jarvis::io::generator::GenerationPurpose;
use jarvis::io::outcome_store::OutcomeStore;
use jarvis::io::prompt::PromptBuilder;
use jarvis::plan::Plan;
use jarvis::test_support::{ScriptedGenerator, outcome_yaml, plan_with};

fn three_task_plan() -> Plan {
    plan_with(
        &[(1, "search"), (2, "download"), (3, "summarize")],
        &[(2, vec![1]), (3, vec![1, 2])],
    )
}

fn compile_initial(store: &OutcomeStore, prompts: &PromptBuilder) -> ScriptedGenerator {
    let generator = ScriptedGenerator::new();
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "search", "urls saved").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(2, "download", "pages saved").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(3, "summarize", "summary written").as_str()));
    let outcomes = PlanCompiler::new(&generator, store, prompts)
        .compile_plan(&three_task_plan())
        .expect("compile");
    let order: Vec<i64> = outcomes.iter().map(|o| o.task_num).collect();
    assert_eq!(order, vec![1, 2, 3]);
    generator
}

/// Verifies dependents see every dependency's outcome in their prompt.
#[test]
fn compile_plan_feeds_dependencies_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = OutcomeStore::new(temp.path().join("tasks"));
    let prompts = PromptBuilder::new(100_000);

    let generator = compile_initial(&store, &prompts);

    let sent = generator.prompts(GenerationPurpose::Compile);
    assert!(!sent[0].contains("urls saved"));
    assert!(sent[1].contains("task 1 (search): urls saved"));
    assert!(sent[2].contains("task 1 (search): urls saved"));
    assert!(sent[2].contains("task 2 (download): pages saved"));
    for n in 1..=3 {
        assert!(store.path(n).is_file());
    }
}

/// Verifies an unchanged overall outcome leaves every other file byte-identical.
#[test]
fn recompile_with_same_outcome_keeps_other_tasks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = OutcomeStore::new(temp.path().join("tasks"));
    let prompts = PromptBuilder::new(100_000);
    compile_initial(&store, &prompts);
    let before_1 = fs::read(store.path(1)).expect("read 1");
    let before_3 = fs::read(store.path(3)).expect("read 3");

    let generator = ScriptedGenerator::new();
    let reworded = outcome_yaml(2, "download", "pages saved").replace("TellUser", "ReadFile");
    generator.push(GenerationPurpose::Compile, Ok(reworded.as_str()));
    let outcomes = PlanCompiler::new(&generator, &store, &prompts)
        .compile_task_in_plan(&three_task_plan(), 2)
        .expect("recompile");

    assert_eq!(outcomes.len(), 3);
    assert_eq!(generator.calls(GenerationPurpose::Compile), 1);
    assert_eq!(fs::read(store.path(1)).expect("read 1"), before_1);
    assert_eq!(fs::read(store.path(3)).expect("read 3"), before_3);
    assert_eq!(fs::read_to_string(store.path(2)).expect("read 2"), reworded);
}

/// Verifies a changed overall outcome regenerates every later task.
#[test]
fn recompile_with_changed_outcome_regenerates_later_tasks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = OutcomeStore::new(temp.path().join("tasks"));
    let prompts = PromptBuilder::new(100_000);
    compile_initial(&store, &prompts);

    let generator = ScriptedGenerator::new();
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "search", "urls saved under key links").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(2, "download", "pages saved v2").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(3, "summarize", "summary v2").as_str()));
    let outcomes = PlanCompiler::new(&generator, &store, &prompts)
        .compile_task_in_plan(&three_task_plan(), 1)
        .expect("recompile");

    assert_eq!(generator.calls(GenerationPurpose::Compile), 3);
    assert_eq!(outcomes[2].overall_outcome, "summary v2");
    let sent = generator.prompts(GenerationPurpose::Compile);
    assert!(sent[1].contains("urls saved under key links"));
    let reloaded = store.load(3).expect("load").expect("outcome");
    assert_eq!(reloaded.overall_outcome, "summary v2");
}

/// Verifies an unreadable cached file is regenerated instead of failing the run.
#[test]
fn corrupt_cache_entry_is_recompiled() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = OutcomeStore::new(temp.path().join("tasks"));
    let prompts = PromptBuilder::new(100_000);
    compile_initial(&store, &prompts);
    fs::write(store.path(1), "task_num: [broken").expect("corrupt");

    let generator = ScriptedGenerator::new();
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "search", "urls saved").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(3, "summarize", "summary written").as_str()));
    PlanCompiler::new(&generator, &store, &prompts)
        .compile_task_in_plan(&three_task_plan(), 3)
        .expect("recompile");

    assert_eq!(generator.calls(GenerationPurpose::Compile), 2);
    assert!(store.load(1).expect("load").is_some());
}

/// Task 4 declares no dependencies at all.
fn four_task_plan() -> Plan {
    plan_with(
        &[(1, "search"), (2, "download"), (3, "summarize"), (4, "archive logs")],
        &[(2, vec![1]), (3, vec![2])],
    )
}

fn compile_four(store: &OutcomeStore, prompts: &PromptBuilder) {
    let generator = ScriptedGenerator::new();
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(1, "search", "urls saved").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(2, "download", "pages saved").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(3, "summarize", "summary written").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(4, "archive logs", "logs archived").as_str()));
    PlanCompiler::new(&generator, store, prompts)
        .compile_plan(&four_task_plan())
        .expect("compile");
}

/// Verifies a changed outcome also regenerates later tasks that do not depend on it.
#[test]
fn changed_outcome_regenerates_unrelated_later_task() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = OutcomeStore::new(temp.path().join("tasks"));
    let prompts = PromptBuilder::new(100_000);
    compile_four(&store, &prompts);
    let before_1 = fs::read(store.path(1)).expect("read 1");

    let generator = ScriptedGenerator::new();
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(2, "download", "pages saved as pdf").as_str()));
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(3, "summarize", "summary v2").as_str()));
    let archived = outcome_yaml(4, "archive logs", "logs archived v2");
    generator.push(GenerationPurpose::Compile, Ok(archived.as_str()));
    let outcomes = PlanCompiler::new(&generator, &store, &prompts)
        .compile_task_in_plan(&four_task_plan(), 2)
        .expect("recompile");

    assert_eq!(generator.calls(GenerationPurpose::Compile), 3);
    assert_eq!(outcomes[3].overall_outcome, "logs archived v2");
    assert_eq!(fs::read_to_string(store.path(4)).expect("read 4"), archived);
    assert_eq!(fs::read(store.path(1)).expect("read 1"), before_1);
    let sent = generator.prompts(GenerationPurpose::Compile);
    assert!(!sent[2].contains("Outcomes Of Prerequisite Tasks"));
}

/// Verifies an unchanged outcome leaves an unrelated later task untouched.
#[test]
fn unchanged_outcome_keeps_unrelated_later_task() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = OutcomeStore::new(temp.path().join("tasks"));
    let prompts = PromptBuilder::new(100_000);
    compile_four(&store, &prompts);
    let before_3 = fs::read(store.path(3)).expect("read 3");
    let before_4 = fs::read(store.path(4)).expect("read 4");

    let generator = ScriptedGenerator::new();
    generator.push(GenerationPurpose::Compile, Ok(outcome_yaml(2, "download", "pages saved").as_str()));
    PlanCompiler::new(&generator, &store, &prompts)
        .compile_task_in_plan(&four_task_plan(), 2)
        .expect("recompile");

    assert_eq!(generator.calls(GenerationPurpose::Compile), 1);
    assert_eq!(fs::read(store.path(3)).expect("read 3"), before_3);
    assert_eq!(fs::read(store.path(4)).expect("read 4"), before_4);
}
