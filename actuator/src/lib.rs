//! Confined execution engine for model-produced action plans.
//!
//! A reply from a language model is scanned for an action plan (an explanation
//! plus an ordered list of typed actions). Each action runs against a single
//! workspace root under a fixed set of safety rules: paths never escape the
//! root, only allowlisted file types are mutated, binary files are never
//! treated as text, and shell strings carrying dangerous commands or injection
//! metacharacters are refused.
//!
//! - **[`core`]**: Pure logic (plan extraction, command classification,
//!   metrics, code heuristics). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting pieces (path confinement, file store, read
//!   cache, interactive processes, git, config, snapshots).
//!
//! [`dispatch`] ties the two together for one plan; [`session`] is the
//! composition root for a conversation with a chat collaborator.

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
