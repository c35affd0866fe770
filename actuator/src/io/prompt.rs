//! System prompt describing the action-plan format to the model.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::ACTION_KINDS;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Optional workspace file whose contents lead the system prompt.
pub const INSTRUCTIONS_FILE: &str = "AGENT.md";

const DEFAULT_INSTRUCTIONS: &str = "You are a coding agent working inside a single workspace.";

#[derive(Debug, Serialize)]
struct ActionExample {
    kind: &'static str,
    fields: &'static str,
}

fn example_fields(kind: &str) -> Option<&'static str> {
    let fields = match kind {
        "read_file" | "delete_file" | "create_directory" => r#""path": "...""#,
        "write_file" | "append_to_file" => r#""path": "...", "content": "...""#,
        "list_files" => r#""pattern": "**/*.py""#,
        "git_commit" => r#""message": "...""#,
        "web_search" => r#""query": "...""#,
        "analyze_code" => r#""path": "...""#,
        "start_process" => r#""command": "...""#,
        "send_input" => r#""pid": 123, "data": "...""#,
        "read_output" | "read_error" | "stop_process" => r#""pid": 123"#,
        _ => return None,
    };
    Some(fields)
}

/// Render the system prompt. `instructions` replaces the default preamble.
pub fn render_system_prompt(instructions: Option<&str>) -> Result<String> {
    let actions = ACTION_KINDS
        .iter()
        .map(|kind| {
            example_fields(kind)
                .map(|fields| ActionExample { kind, fields })
                .ok_or_else(|| anyhow!("no prompt example for action '{kind}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .context("load system prompt template")?;
    let rendered = env.get_template("system")?.render(context! {
        instructions => instructions
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTIONS),
        actions => actions,
    })?;
    Ok(rendered)
}

/// Read `AGENT.md` from the workspace root, if present and non-empty.
pub fn load_instructions(root: &Path) -> Option<String> {
    let path = root.join(INSTRUCTIONS_FILE);
    match fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => {
            debug!(path = %path.display(), "loaded agent instructions");
            Some(text)
        }
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), err = %err, "no agent instructions");
            None
        }
    }
}
