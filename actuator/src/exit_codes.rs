//! Stable exit codes for the `actuator` CLI.

/// Command succeeded and every action in every plan succeeded.
pub const OK: i32 = 0;
/// Invalid usage, unreadable config, or another error outside plan execution.
pub const INVALID: i32 = 1;
/// The input did not contain an action plan; it was echoed as a reply.
pub const NOT_A_PLAN: i32 = 2;
/// At least one action in a plan failed.
pub const ACTION_FAILED: i32 = 3;
/// `actuator check-command` classified the command as blocked.
pub const BLOCKED: i32 = 4;
