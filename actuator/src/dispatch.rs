//! Plan execution: one reply in, one report out.
//!
//! [`ActionDispatcher`] owns every stateful component (file store with its
//! cache, process registry, performance ledger) plus the collaborators. Actions
//! run strictly in plan order; a failing action becomes a failed narrative and
//! never aborts the rest of the plan.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::analysis::{CodeAnalyzer, HeuristicAnalyzer, suggestions};
use crate::core::command_guard::{CommandGuard, CommandVerdict};
use crate::core::ledger::PerformanceLedger;
use crate::core::plan::{NotAPlanReason, PlanParse, parse_plan};
use crate::core::types::{Action, ActionPlan, ExecutionResult, PlanReport};
use crate::io::cache::OperationCache;
use crate::io::config::EngineConfig;
use crate::io::file_store::FileStore;
use crate::io::git::{CommitOutcome, GitOps};
use crate::io::path_guard::PathGuard;
use crate::io::process::{ProcessRegistry, StreamRead};
use crate::io::search::WebSearch;
use crate::io::snapshot::Snapshot;

/// What a reply turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed(PlanReport),
    /// Conversational reply; nothing was executed.
    NotAPlan(NotAPlanReason),
}

pub struct ActionDispatcher {
    files: FileStore,
    commands: CommandGuard,
    processes: ProcessRegistry,
    ledger: PerformanceLedger,
    analyzer: Box<dyn CodeAnalyzer>,
    git: Option<Box<dyn GitOps>>,
    search: Option<Box<dyn WebSearch>>,
}

impl ActionDispatcher {
    pub fn new(
        files: FileStore,
        commands: CommandGuard,
        processes: ProcessRegistry,
        ledger: PerformanceLedger,
    ) -> Self {
        Self {
            files,
            commands,
            processes,
            ledger,
            analyzer: Box::new(HeuristicAnalyzer),
            git: None,
            search: None,
        }
    }

    /// Build every component for `root` from config. No collaborators beyond
    /// the built-in analyzer are attached.
    pub fn from_config(root: &Path, config: &EngineConfig) -> Result<Self> {
        let guard = PathGuard::new(root, config.confinement())?;
        let processes = ProcessRegistry::new(guard.root(), config.stop_grace());
        let cache = OperationCache::new(config.cache_ttl(), config.cache_min_read_duration());
        let files = FileStore::new(guard, cache, config.file_limits());
        Ok(Self::new(
            files,
            config.command_guard(),
            processes,
            PerformanceLedger::new(config.slow_operation()),
        ))
    }

    pub fn with_git(mut self, git: impl GitOps + 'static) -> Self {
        self.git = Some(Box::new(git));
        self
    }

    pub fn with_search(mut self, search: impl WebSearch + 'static) -> Self {
        self.search = Some(Box::new(search));
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl CodeAnalyzer + 'static) -> Self {
        self.analyzer = Box::new(analyzer);
        self
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        self.files.root()
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn ledger(&self) -> &PerformanceLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut PerformanceLedger {
        &mut self.ledger
    }

    /// Seed the cache and ledger from a persisted snapshot.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.files.cache_mut().import_entries(snapshot.cache_entries);
        self.ledger = std::mem::take(&mut self.ledger).with_metrics(snapshot.metrics);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.root(), self.files.cache(), &self.ledger)
    }

    /// Parse `reply` and execute it if it carries a plan.
    pub fn handle_reply(&mut self, reply: &str) -> DispatchOutcome {
        match parse_plan(reply) {
            PlanParse::Plan(plan) => DispatchOutcome::Executed(self.execute(&plan)),
            PlanParse::NotAPlan(reason) => {
                debug!(%reason, "reply is not an action plan");
                DispatchOutcome::NotAPlan(reason)
            }
        }
    }

    #[instrument(skip_all, fields(actions = plan.actions.len()))]
    pub fn execute(&mut self, plan: &ActionPlan) -> PlanReport {
        let mut results = Vec::with_capacity(plan.actions.len());
        for action in &plan.actions {
            let started = Instant::now();
            let result = self.run_action(action);
            if let Action::Unknown { kind } = action {
                warn!(kind = %kind, "unknown action type");
            } else {
                self.ledger
                    .record(&action.metric_name(), started.elapsed(), result.succeeded);
            }
            if !result.succeeded {
                debug!(kind = action.kind(), "action failed");
            }
            results.push(result);
        }

        let report = PlanReport {
            explanation: plan.explanation.clone(),
            results,
        };
        info!(
            actions = report.results.len(),
            failed = report.failure_count(),
            "plan executed"
        );
        report
    }

    fn run_action(&mut self, action: &Action) -> ExecutionResult {
        match action {
            Action::ReadFile { path } => match self.files.read(path) {
                Ok(content) => ExecutionResult::ok(format!("Read `{path}`:\n{content}")),
                Err(err) => ExecutionResult::failed(format!("Error reading `{path}`: {err}")),
            },
            Action::WriteFile { path, content } => match self.files.write(path, content) {
                Ok(()) => ExecutionResult::ok(format!("Wrote `{path}`.")),
                Err(err) => ExecutionResult::failed(format!("Error writing `{path}`: {err}")),
            },
            Action::AppendFile { path, content } => match self.files.append(path, content) {
                Ok(()) => ExecutionResult::ok(format!("Appended to `{path}`.")),
                Err(err) => {
                    ExecutionResult::failed(format!("Error appending to `{path}`: {err}"))
                }
            },
            Action::DeleteFile { path } => match self.files.delete(path) {
                Ok(()) => ExecutionResult::ok(format!("Deleted `{path}`.")),
                Err(err) => ExecutionResult::failed(format!("Error deleting `{path}`: {err}")),
            },
            Action::ListFiles { pattern } => match self.files.list(pattern) {
                Ok(files) => {
                    let mut narrative =
                        format!("Found {} files matching '{pattern}':", files.len());
                    for file in &files {
                        narrative.push_str("\n- ");
                        narrative.push_str(file);
                    }
                    ExecutionResult::ok(narrative)
                }
                Err(err) => ExecutionResult::failed(format!(
                    "Error listing files with pattern '{pattern}': {err}"
                )),
            },
            Action::CreateDirectory { path } => match self.files.create_dir(path) {
                Ok(()) => ExecutionResult::ok(format!("Created directory `{path}`.")),
                Err(err) => ExecutionResult::failed(format!(
                    "Error creating directory `{path}`: {err}"
                )),
            },
            Action::GitCommit { message } => self.git_commit(message),
            Action::WebSearch { query } => self.web_search(query),
            Action::AnalyzeCode {
                path,
                filename,
                content,
            } => self.analyze_code(path.as_deref(), filename.as_deref(), content.as_deref()),
            Action::StartProcess { command } => self.start_process(command),
            Action::SendInput { pid, data } => match self.processes.write_input(*pid, data) {
                Ok(()) => ExecutionResult::ok(format!("Sent input to process {pid}.")),
                Err(err) => ExecutionResult::failed(format!(
                    "Error sending input to process {pid}: {err}"
                )),
            },
            Action::ReadOutput { pid } => match self.processes.read_output(*pid) {
                Ok(read) => stream_narrative(*pid, "Output", read),
                Err(err) => ExecutionResult::failed(format!(
                    "Error reading output of process {pid}: {err}"
                )),
            },
            Action::ReadError { pid } => match self.processes.read_error(*pid) {
                Ok(read) => stream_narrative(*pid, "Error output", read),
                Err(err) => ExecutionResult::failed(format!(
                    "Error reading error output of process {pid}: {err}"
                )),
            },
            Action::StopProcess { pid } => match self.processes.stop(*pid) {
                Ok(()) => ExecutionResult::ok(format!("Stopped process {pid}.")),
                Err(err) => {
                    ExecutionResult::failed(format!("Error stopping process {pid}: {err}"))
                }
            },
            Action::Invalid { kind, reason } => {
                ExecutionResult::failed(format!("Invalid `{kind}` action: {reason}"))
            }
            Action::Unknown { kind } => {
                ExecutionResult::failed(format!("Skipped unknown action type '{kind}'."))
            }
        }
    }

    fn git_commit(&mut self, message: &str) -> ExecutionResult {
        let Some(git) = self.git.as_ref() else {
            return ExecutionResult::failed(format!(
                "Git is not available; cannot commit: {message}"
            ));
        };
        let outcome = git.stage_all().and_then(|()| git.commit(message));
        match outcome {
            Ok(CommitOutcome::Committed) => ExecutionResult::ok(format!("Git commit: {message}")),
            Ok(CommitOutcome::NothingToCommit) => {
                ExecutionResult::ok(format!("Nothing to commit for: {message}"))
            }
            Err(err) => ExecutionResult::failed(format!("Error committing changes: {err:#}")),
        }
    }

    fn web_search(&mut self, query: &str) -> ExecutionResult {
        let Some(search) = self.search.as_mut() else {
            warn!(query, "no search provider available");
            return ExecutionResult::failed(format!(
                "No search provider available for query: {query}"
            ));
        };
        let started = Instant::now();
        let answer = search.search(query);
        self.ledger
            .record("web_search", started.elapsed(), answer.is_ok());
        match answer {
            Ok(answer) => ExecutionResult::ok(format!("Web search for '{query}':\n{answer}")),
            Err(err) => {
                ExecutionResult::failed(format!("Error searching for '{query}': {err:#}"))
            }
        }
    }

    fn analyze_code(
        &mut self,
        path: Option<&str>,
        filename: Option<&str>,
        content: Option<&str>,
    ) -> ExecutionResult {
        let (name, source) = match (path, filename, content) {
            (Some(path), _, _) => match self.files.read(path) {
                Ok(source) => (path, source),
                Err(err) => {
                    return ExecutionResult::failed(format!(
                        "Error reading file to analyze: {err}"
                    ));
                }
            },
            (None, Some(filename), Some(content)) => (filename, content.to_string()),
            _ => {
                return ExecutionResult::failed(
                    "Error: analyze_code requires either 'path' or both 'filename' and 'content'",
                );
            }
        };

        let issues = self.analyzer.analyze(name, &source);
        let mut narrative = format!("Code analysis for `{name}`:");
        for suggestion in suggestions(&issues) {
            narrative.push_str("\n- ");
            narrative.push_str(&suggestion);
        }
        ExecutionResult::ok(narrative)
    }

    fn start_process(&mut self, command: &str) -> ExecutionResult {
        if let CommandVerdict::Blocked(reason) = self.commands.classify(command) {
            warn!(command, %reason, "command blocked");
            return ExecutionResult::failed(format!("Blocked command `{command}`: {reason}"));
        }
        match self.processes.start(command) {
            Ok(pid) => ExecutionResult::ok(format!("Started process with PID: {pid}")),
            Err(err) => ExecutionResult::failed(format!("Error starting process: {err}")),
        }
    }
}

fn stream_narrative(pid: u32, label: &str, read: StreamRead) -> ExecutionResult {
    match read {
        StreamRead::Line(line) => {
            ExecutionResult::ok(format!("{label} from process {pid}:\n{line}"))
        }
        StreamRead::Pending => ExecutionResult::ok(format!(
            "No {} from process {pid} yet.",
            label.to_lowercase()
        )),
        StreamRead::Closed => {
            ExecutionResult::ok(format!("{label} stream of process {pid} is closed."))
        }
    }
}
