//! Deterministic classification of shell strings.
//!
//! Two independent substring checks over the lowercased command: a denylist
//! of destructive or power-state commands, and a scan for shell
//! metacharacters that chain, substitute or redirect. Either hit blocks the
//! command. This is a heuristic over a shell-interpreted string, not a shell
//! parser; both lists are configuration.

use std::fmt;

/// Destructive filesystem, disk and power commands.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "rm -rf",
    "rm -r",
    "rmdir",
    "del /s",
    "format",
    "fdisk",
    "mkfs",
    "dd if=",
    ">/dev/",
    ">/etc/",
    "cat > /etc/",
    "echo > /etc/",
    "chmod 777 /",
    "mv /etc/",
    "cp /etc/",
    "touch /etc/",
    "shutdown",
    "reboot",
    "poweroff",
    "halt",
];

/// Chaining, substitution and redirection metacharacters.
pub const DEFAULT_INJECTION_PATTERNS: &[&str] =
    &["&&", "||", ";", "`", "$(", "|", ">", ">>", "<"];

/// Verdict for one command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    Safe,
    Blocked(BlockReason),
}

impl CommandVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, CommandVerdict::Safe)
    }
}

/// Which check rejected the command, with the matching pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Empty,
    Dangerous(String),
    Injection(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Empty => f.write_str("empty command"),
            BlockReason::Dangerous(pattern) => {
                write!(f, "potentially dangerous command (matched '{pattern}')")
            }
            BlockReason::Injection(pattern) => {
                write!(f, "injection risk (matched '{pattern}')")
            }
        }
    }
}

/// Denylist + injection classifier. Patterns are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGuard {
    denylist: Vec<String>,
    injection_patterns: Vec<String>,
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::new(
            DEFAULT_DENYLIST.iter().map(|s| s.to_string()),
            DEFAULT_INJECTION_PATTERNS.iter().map(|s| s.to_string()),
        )
    }
}

impl CommandGuard {
    pub fn new(
        denylist: impl IntoIterator<Item = String>,
        injection_patterns: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            denylist: normalize(denylist),
            injection_patterns: normalize(injection_patterns),
        }
    }

    /// Classify `command`. Pure; safe to call speculatively.
    pub fn classify(&self, command: &str) -> CommandVerdict {
        if command.trim().is_empty() {
            return CommandVerdict::Blocked(BlockReason::Empty);
        }
        let lowered = command.to_lowercase();
        if let Some(pattern) = first_match(&lowered, &self.denylist) {
            return CommandVerdict::Blocked(BlockReason::Dangerous(pattern));
        }
        if let Some(pattern) = first_match(&lowered, &self.injection_patterns) {
            return CommandVerdict::Blocked(BlockReason::Injection(pattern));
        }
        CommandVerdict::Safe
    }
}

fn normalize(patterns: impl IntoIterator<Item = String>) -> Vec<String> {
    patterns
        .into_iter()
        .map(|pattern| pattern.to_lowercase())
        .filter(|pattern| !pattern.is_empty())
        .collect()
}

fn first_match(haystack: &str, patterns: &[String]) -> Option<String> {
    patterns
        .iter()
        .find(|pattern| haystack.contains(pattern.as_str()))
        .cloned()
}
