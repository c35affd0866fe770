//! Lenient extraction of an action plan from a model reply.
//!
//! The producer is a language model, not a strict API: plans arrive wrapped
//! in prose or markdown fences. Extraction takes the text between the first
//! `{` and the last `}`; everything that fails from there on is reported as
//! [`PlanParse::NotAPlan`] so the caller can treat the reply as conversation.

use std::fmt;
use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::core::types::{ACTION_KINDS, Action, ActionPlan};

const ACTION_PLAN_SCHEMA: &str = include_str!("../../schemas/action_plan.schema.json");

static ENVELOPE_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(ACTION_PLAN_SCHEMA)
        .map_err(|err| format!("plan schema unreadable: {err}"))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("plan schema invalid: {err}"))
});

/// Result of scanning a reply for a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanParse {
    Plan(ActionPlan),
    NotAPlan(NotAPlanReason),
}

/// Why a reply was not treated as a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotAPlanReason {
    /// No `{ ... }` span in the reply.
    NoJsonObject,
    /// The span was not valid JSON.
    InvalidJson(String),
    /// Valid JSON, but not a plan envelope.
    SchemaMismatch(Vec<String>),
}

impl fmt::Display for NotAPlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotAPlanReason::NoJsonObject => f.write_str("no JSON object in reply"),
            NotAPlanReason::InvalidJson(err) => write!(f, "invalid JSON: {err}"),
            NotAPlanReason::SchemaMismatch(errors) => {
                write!(f, "not an action plan: {}", errors.join("; "))
            }
        }
    }
}

/// Return the span from the first `{` to the last `}` (inclusive).
///
/// `None` when either brace is missing or they are out of order.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

/// Scan `reply` for an action plan.
pub fn parse_plan(reply: &str) -> PlanParse {
    let Some(raw) = extract_json_object(reply) else {
        return PlanParse::NotAPlan(NotAPlanReason::NoJsonObject);
    };
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => return PlanParse::NotAPlan(NotAPlanReason::InvalidJson(err.to_string())),
    };
    if let Err(errors) = validate_envelope(&value) {
        return PlanParse::NotAPlan(NotAPlanReason::SchemaMismatch(errors));
    }

    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let actions: Vec<Action> = value
        .get("actions")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().map(decode_action).collect())
        .unwrap_or_default();

    PlanParse::Plan(ActionPlan {
        explanation,
        actions,
    })
}

/// Decode one entry. Never fails: unknown or malformed entries become
/// terminal variants so the dispatcher can narrate them.
pub fn decode_action(entry: &Value) -> Action {
    let Some(kind) = entry.get("type").and_then(Value::as_str) else {
        return Action::Invalid {
            kind: "<untyped>".to_string(),
            reason: "action has no string `type` field".to_string(),
        };
    };
    // `append_file` is an accepted alias of `append_to_file`.
    if !ACTION_KINDS.contains(&kind) && kind != "append_file" {
        return Action::Unknown {
            kind: kind.to_string(),
        };
    }
    match serde_json::from_value::<Action>(entry.clone()) {
        Ok(action) => action,
        Err(err) => Action::Invalid {
            kind: kind.to_string(),
            reason: err.to_string(),
        },
    }
}

fn validate_envelope(instance: &Value) -> Result<(), Vec<String>> {
    let validator = ENVELOPE_VALIDATOR
        .as_ref()
        .map_err(|err| vec![err.clone()])?;
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages)
    }
}
