//! `actuator`: execute model-produced action plans in a confined workspace.
//!
//! Plans are read from files or stdin and executed in order through one
//! dispatcher, so processes started by one plan can be driven by the next.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use actuator::core::command_guard::CommandVerdict;
use actuator::core::ledger::PerformanceLedger;
use actuator::dispatch::{ActionDispatcher, DispatchOutcome};
use actuator::exit_codes;
use actuator::io::config::{EngineConfig, config_path, load_config, write_config};
use actuator::io::git::Git;
use actuator::io::snapshot::{default_snapshot_path, load_snapshot, save_snapshot};
use actuator::logging;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "actuator",
    version,
    about = "Execute model-produced action plans in a confined workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.actuator/config.toml` with default settings.
    Init {
        /// Workspace root.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Execute plan files (or stdin) in order and print each report.
    Run {
        /// Workspace root.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        /// Plan file; repeat for several plans. Reads stdin when omitted.
        #[arg(long = "plan", value_name = "FILE")]
        plans: Vec<PathBuf>,
    },
    /// Classify a shell command with the configured guard.
    CheckCommand {
        command: String,
        /// Workspace whose config supplies the guard lists.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Print persisted performance metrics for a workspace.
    Metrics {
        /// Workspace root.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            process::exit(code);
        }
    };
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { workspace, force } => cmd_init(&workspace, force),
        Command::Run { workspace, plans } => cmd_run(&workspace, &plans),
        Command::CheckCommand { command, workspace } => cmd_check_command(&workspace, &command),
        Command::Metrics { workspace } => cmd_metrics(&workspace),
    }
}

fn cmd_init(workspace: &Path, force: bool) -> Result<i32> {
    let path = config_path(workspace);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(workspace: &Path, plans: &[PathBuf]) -> Result<i32> {
    let config = load_config(&config_path(workspace))?;
    let mut dispatcher = ActionDispatcher::from_config(workspace, &config)?;
    let git = Git::new(dispatcher.root());
    if git.is_repository() {
        dispatcher = dispatcher.with_git(git);
    } else {
        debug!("workspace is not a git repository; git_commit disabled");
    }

    let snapshot_path = if config.cache.persist {
        let path = default_snapshot_path(dispatcher.root())?;
        dispatcher.restore(load_snapshot(&path, dispatcher.root()));
        Some(path)
    } else {
        None
    };

    let mut code = exit_codes::OK;
    for text in read_inputs(plans)? {
        match dispatcher.handle_reply(&text) {
            DispatchOutcome::Executed(report) => {
                print!("{}", report.render());
                if !report.all_succeeded() {
                    code = code.max(exit_codes::ACTION_FAILED);
                }
            }
            DispatchOutcome::NotAPlan(reason) => {
                println!("{}", text.trim_end());
                eprintln!("not an action plan: {reason}");
                code = code.max(exit_codes::NOT_A_PLAN);
            }
        }
    }

    if let Some(path) = snapshot_path {
        save_snapshot(&path, &dispatcher.snapshot())?;
    }
    Ok(code)
}

fn read_inputs(plans: &[PathBuf]) -> Result<Vec<String>> {
    if plans.is_empty() {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("read plan from stdin")?;
        return Ok(vec![text]);
    }
    plans
        .iter()
        .map(|path| {
            fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))
        })
        .collect()
}

fn cmd_check_command(workspace: &Path, command: &str) -> Result<i32> {
    let config = load_config(&config_path(workspace))?;
    match config.command_guard().classify(command) {
        CommandVerdict::Safe => {
            println!("safe");
            Ok(exit_codes::OK)
        }
        CommandVerdict::Blocked(reason) => {
            println!("blocked: {reason}");
            Ok(exit_codes::BLOCKED)
        }
    }
}

fn cmd_metrics(workspace: &Path) -> Result<i32> {
    let root = fs::canonicalize(workspace)
        .with_context(|| format!("canonicalize workspace {}", workspace.display()))?;
    let snapshot = load_snapshot(&default_snapshot_path(&root)?, &root);
    let ledger = PerformanceLedger::default().with_metrics(snapshot.metrics);
    print!("{}", ledger.summary());
    println!("cached reads: {}", snapshot.cache_entries.len());
    Ok(exit_codes::OK)
}
