//! Shared types for plans, actions and their results.
//!
//! These types define stable contracts between the plan parser, the
//! dispatcher and callers. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Wire tags of every action kind the engine can execute, in prompt order.
pub const ACTION_KINDS: &[&str] = &[
    "read_file",
    "write_file",
    "append_to_file",
    "delete_file",
    "list_files",
    "create_directory",
    "git_commit",
    "web_search",
    "analyze_code",
    "start_process",
    "send_input",
    "read_output",
    "read_error",
    "stop_process",
];

/// Glob used by `list_files` when the model omits `pattern`.
pub const DEFAULT_LIST_PATTERN: &str = "**/*.py";

/// A parsed plan: explanation plus actions in execution order.
///
/// Immutable once parsed; a plan is executed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPlan {
    pub explanation: String,
    pub actions: Vec<Action>,
}

/// One operation requested by the model.
///
/// Deserialized from `{"type": "<tag>", ...fields}`. Kinds outside
/// [`ACTION_KINDS`] become [`Action::Unknown`]; known kinds with undecodable
/// fields become [`Action::Invalid`]. Neither is ever dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    #[serde(rename = "append_to_file", alias = "append_file")]
    AppendFile {
        path: String,
        content: String,
    },
    DeleteFile {
        path: String,
    },
    ListFiles {
        #[serde(default = "default_list_pattern")]
        pattern: String,
    },
    CreateDirectory {
        path: String,
    },
    GitCommit {
        message: String,
    },
    WebSearch {
        query: String,
    },
    /// Either `path` (read through the file store) or `filename` + `content`.
    AnalyzeCode {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    StartProcess {
        command: String,
    },
    SendInput {
        #[serde(deserialize_with = "de_pid")]
        pid: u32,
        data: String,
    },
    ReadOutput {
        #[serde(deserialize_with = "de_pid")]
        pid: u32,
    },
    ReadError {
        #[serde(deserialize_with = "de_pid")]
        pid: u32,
    },
    StopProcess {
        #[serde(deserialize_with = "de_pid")]
        pid: u32,
    },
    /// A `type` tag the engine does not know.
    #[serde(skip)]
    Unknown { kind: String },
    /// A known tag whose fields could not be decoded.
    #[serde(skip)]
    Invalid { kind: String, reason: String },
}

impl Action {
    /// Wire tag for this action (also the suffix of its ledger metric name).
    pub fn kind(&self) -> &str {
        match self {
            Action::ReadFile { .. } => "read_file",
            Action::WriteFile { .. } => "write_file",
            Action::AppendFile { .. } => "append_to_file",
            Action::DeleteFile { .. } => "delete_file",
            Action::ListFiles { .. } => "list_files",
            Action::CreateDirectory { .. } => "create_directory",
            Action::GitCommit { .. } => "git_commit",
            Action::WebSearch { .. } => "web_search",
            Action::AnalyzeCode { .. } => "analyze_code",
            Action::StartProcess { .. } => "start_process",
            Action::SendInput { .. } => "send_input",
            Action::ReadOutput { .. } => "read_output",
            Action::ReadError { .. } => "read_error",
            Action::StopProcess { .. } => "stop_process",
            Action::Unknown { kind } | Action::Invalid { kind, .. } => kind,
        }
    }

    /// Ledger metric name, `action_<tag>`.
    pub fn metric_name(&self) -> String {
        format!("action_{}", self.kind())
    }
}

fn default_list_pattern() -> String {
    DEFAULT_LIST_PATTERN.to_string()
}

/// Models emit pids as numbers or as quoted numbers; accept both.
fn de_pid<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPid {
        Number(u32),
        Text(String),
    }

    match RawPid::deserialize(deserializer)? {
        RawPid::Number(pid) => Ok(pid),
        RawPid::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid pid '{text}'"))),
    }
}

/// Outcome of one action: human-readable narrative plus success flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub narrative: String,
    pub succeeded: bool,
}

impl ExecutionResult {
    pub fn ok(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            succeeded: true,
        }
    }

    pub fn failed(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            succeeded: false,
        }
    }
}

/// Aggregated result of one plan, in action order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub explanation: String,
    pub results: Vec<ExecutionResult>,
}

impl PlanReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|result| result.succeeded)
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|result| !result.succeeded).count()
    }

    /// Explanation header followed by each narrative, one block per action.
    pub fn render(&self) -> String {
        let mut out = format!("Plan: {}\n", self.explanation);
        for result in &self.results {
            out.push_str(&result.narrative);
            out.push('\n');
        }
        out
    }
}

/// Coarse failure classes shared by every component.
///
/// None of these is fatal: each ends up as a failed narrative, or (for
/// `Parse`) as a conversational reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Path outside workspace, disallowed extension, bad encoding, unsafe command.
    Validation,
    /// Missing file or process.
    NotFound,
    /// File above the size ceiling.
    ResourceLimit,
    /// Reply did not carry a usable plan.
    Parse,
    /// Action kind with no handler.
    UnknownAction,
    /// Unexpected I/O or collaborator failure.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Validation => "validation",
            ErrorClass::NotFound => "not_found",
            ErrorClass::ResourceLimit => "resource_limit",
            ErrorClass::Parse => "parse",
            ErrorClass::UnknownAction => "unknown_action",
            ErrorClass::Internal => "internal",
        };
        f.write_str(label)
    }
}
