//! jarvis CLI.
//!
//! Works on the `.jarvis/` directory under `--root` (default: the current
//! directory). Exit codes are listed in `jarvis::exit_codes`.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::warn;

use jarvis::exit_codes;
use jarvis::io::checkpoint::CheckpointStore;
use jarvis::io::confirm::StdinConfirmer;
use jarvis::io::init::{InitOptions, init_workspace};
use jarvis::logging;
use jarvis::looping::{ControlLoop, LoopSettings, LoopStop, initial_context};
use jarvis::plan::TaskOutcome;
use jarvis::session::Session;
use jarvis::validate::validate_workspace;

#[derive(Parser)]
#[command(
    name = "jarvis",
    version,
    about = "Compile task plans into instructions and run them"
)]
struct Cli {
    /// Project root containing `.jarvis/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Debug-level logging (unless `RUST_LOG` is set).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.jarvis/` with a default config and a placeholder plan.
    Init {
        /// Overwrite existing files and clear the checkpoint.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, plan invariants and cached outcomes.
    Validate,
    /// Compile every task in `plan.yaml`.
    Compile,
    /// Recompile a task, and later tasks if its outcome changed.
    Recompile { task_num: i64 },
    /// Execute a compiled task's instructions.
    Exec { task_num: i64 },
    /// Interactive loop: one generated action per iteration.
    Run {
        /// Start a new goal instead of resuming the checkpoint.
        #[arg(long)]
        goal: Option<String>,
        /// Run actions without asking for confirmation.
        #[arg(long)]
        continuous: bool,
        /// Seconds to wait for an answer before using the default.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Validate => cmd_validate(root),
        Command::Compile => {
            let outcomes = Session::open(root)?.compile()?;
            print_outcomes(&outcomes);
            Ok(exit_codes::OK)
        }
        Command::Recompile { task_num } => {
            let outcomes = Session::open(root)?.recompile(task_num)?;
            print_outcomes(&outcomes);
            Ok(exit_codes::OK)
        }
        Command::Exec { task_num } => cmd_exec(root, task_num),
        Command::Run {
            goal,
            continuous,
            timeout,
        } => cmd_run(root, goal, continuous, cli.verbose, timeout),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.jarvis_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_workspace(root)?;
    println!(
        "ok: {} tasks, {} compiled",
        outcome.tasks,
        outcome.compiled.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_exec(root: &Path, task_num: i64) -> Result<i32> {
    let report = Session::open(root)?.exec(task_num)?;
    for step in &report.executed {
        println!("[{}] {}\n{}", step.seq, step.description, step.output.trim_end());
    }
    for skipped in &report.skipped {
        println!("[{}] skipped {}: {}", skipped.seq, skipped.type_tag, skipped.diagnostic);
    }
    if let Some(summary) = &report.shutdown {
        println!("shutdown: {summary}");
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    root: &Path,
    goal: Option<String>,
    continuous: bool,
    verbose: bool,
    timeout: Option<u64>,
) -> Result<i32> {
    let mut session = Session::open(root)?;
    session.config.continuous |= continuous;
    session.config.verbose |= verbose;
    if let Some(secs) = timeout {
        session.config.confirm_timeout_secs = secs;
    }

    let checkpoint = match CheckpointStore::open(&session.paths.checkpoint_path) {
        Ok(store) => Some(store),
        Err(err) => {
            warn!(err = %err, "checkpoint store unavailable; progress will not be saved");
            None
        }
    };
    let context = initial_context(checkpoint.as_ref(), goal)?
        .ok_or_else(|| anyhow!("no checkpoint to resume; pass --goal to start"))?;
    let mut variables = session.load_variables()?;

    let confirmer = StdinConfirmer::new();
    let toolbox = session.toolbox();
    let mut control = ControlLoop::new(
        &toolbox,
        &session.prompts,
        &confirmer,
        LoopSettings::from_config(&session.config),
    )
    .with_variables_path(&session.paths.variables_path);
    if let Some(store) = checkpoint.as_ref() {
        control = control.with_checkpoint(store);
    }

    let outcome = control.run(context, &mut variables)?;
    Ok(match outcome.stop {
        LoopStop::Shutdown { .. } => exit_codes::OK,
        LoopStop::Declined => exit_codes::DECLINED,
        LoopStop::MaxIterations { iterations } => {
            eprintln!("stopped after {iterations} iterations without a shutdown");
            exit_codes::MAX_ITERATIONS
        }
    })
}

fn print_outcomes(outcomes: &[TaskOutcome]) {
    for outcome in outcomes {
        println!(
            "task {}: {} ({} instructions)",
            outcome.task_num,
            outcome.overall_outcome,
            outcome.instructions.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["jarvis", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "jarvis",
            "run",
            "--goal",
            "write a report",
            "--continuous",
            "--timeout",
            "5",
            "--verbose",
        ]);
        assert!(cli.verbose);
        let Command::Run {
            goal,
            continuous,
            timeout,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(goal.as_deref(), Some("write a report"));
        assert!(continuous);
        assert_eq!(timeout, Some(5));
    }

    #[test]
    fn parse_recompile_task_num() {
        let cli = Cli::parse_from(["jarvis", "--root", "/tmp/x", "recompile", "3"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/x"));
        assert!(matches!(cli.command, Command::Recompile { task_num: 3 }));
    }
}
