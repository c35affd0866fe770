//! Line-based code analysis used by the `analyze_code` action.
//!
//! [`CodeAnalyzer`] is the collaborator seam; [`HeuristicAnalyzer`] is the
//! built-in implementation. It performs no parsing beyond JSON and is meant
//! to flag obvious hazards, not to replace a linter.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Lines longer than this are reported as a style issue.
pub const MAX_LINE_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Style,
    Correctness,
}

/// One finding, 1-indexed by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub line: usize,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
}

impl Issue {
    fn new(line: usize, severity: Severity, category: Category, message: &str) -> Self {
        Self {
            line,
            severity,
            category,
            message: message.to_string(),
        }
    }
}

/// Analysis collaborator: inspect `content` (named `path`) and report issues.
pub trait CodeAnalyzer {
    fn analyze(&self, path: &str, content: &str) -> Vec<Issue>;
}

/// Built-in analyzer keyed on file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl CodeAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, path: &str, content: &str) -> Vec<Issue> {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let mut issues = match extension.as_str() {
            "py" => python_issues(content),
            "js" | "jsx" | "ts" | "tsx" => script_issues(content),
            "html" | "htm" | "css" => markup_issues(content),
            "json" => json_issues(content),
            _ => Vec::new(),
        };
        issues.extend(generic_issues(content));
        issues.sort_by_key(|issue| issue.line);
        issues
    }
}

/// Render issues as the suggestion list shown to the model.
pub fn suggestions(issues: &[Issue]) -> Vec<String> {
    if issues.is_empty() {
        return vec!["Code looks good! No major issues detected.".to_string()];
    }
    issues
        .iter()
        .map(|issue| match (issue.category, issue.severity) {
            (Category::Security, Severity::Critical) => format!(
                "Fix critical security issue on line {}: {}",
                issue.line, issue.message
            ),
            (Category::Style, _) => format!(
                "Improve code style on line {}: {}",
                issue.line, issue.message
            ),
            _ => format!("Review line {}: {}", issue.line, issue.message),
        })
        .collect()
}

static BARE_EXCEPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*except\s*:").unwrap());
static WILDCARD_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+\S+\s+import\s+\*").unwrap());
static PY_EVAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\beval\s*\(").unwrap());
static PY_EXEC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bexec\s*\(").unwrap());

fn python_issues(content: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let n = idx + 1;
        let code = line.split('#').next().unwrap_or_default();
        if PY_EVAL.is_match(code) {
            issues.push(Issue::new(
                n,
                Severity::Critical,
                Category::Security,
                "Dangerous use of eval() function",
            ));
        }
        if PY_EXEC.is_match(code) {
            issues.push(Issue::new(
                n,
                Severity::Critical,
                Category::Security,
                "Dangerous use of exec() function",
            ));
        }
        if BARE_EXCEPT.is_match(code) {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Correctness,
                "Bare except clause catches every exception",
            ));
        }
        if WILDCARD_IMPORT.is_match(code) {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Style,
                "Wildcard import pollutes the module namespace",
            ));
        }
    }
    issues
}

fn script_issues(content: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let n = idx + 1;
        if line.contains("eval(") {
            issues.push(Issue::new(
                n,
                Severity::Critical,
                Category::Security,
                "Dangerous use of eval() function",
            ));
        } else if line.contains("document.write") {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Security,
                "Using document.write can be dangerous",
            ));
        } else if line.contains("innerHTML") {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Security,
                "innerHTML can lead to XSS vulnerabilities",
            ));
        }
    }
    issues
}

fn markup_issues(content: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let n = idx + 1;
        let lowered = line.to_lowercase();
        if lowered.contains("<script>") && !lowered.contains("src=") {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Security,
                "Inline JavaScript detected",
            ));
        } else if lowered.contains("javascript:") {
            issues.push(Issue::new(
                n,
                Severity::Critical,
                Category::Security,
                "JavaScript protocol detected in HTML",
            ));
        }
    }
    issues
}

fn json_issues(content: &str) -> Vec<Issue> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(_) => Vec::new(),
        Err(err) => vec![Issue {
            line: err.line(),
            severity: Severity::Critical,
            category: Category::Correctness,
            message: format!("Invalid JSON: {err}"),
        }],
    }
}

fn generic_issues(content: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let n = idx + 1;
        if line.chars().count() > MAX_LINE_CHARS {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Style,
                "Line too long (recommended: < 120 characters)",
            ));
        }
        if line.ends_with(' ') || line.ends_with('\t') {
            issues.push(Issue::new(
                n,
                Severity::Warning,
                Category::Style,
                "Trailing whitespace detected",
            ));
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(path: &str, content: &str) -> Vec<Issue> {
        HeuristicAnalyzer.analyze(path, content)
    }

    #[test]
    fn python_eval_is_critical() {
        let issues = analyze("tool.py", "x = 1\nvalue = eval(user_input)\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 2);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn python_comment_mentioning_eval_is_ignored() {
        assert!(analyze("tool.py", "# never call eval(x)\n").is_empty());
    }

    #[test]
    fn python_bare_except_and_wildcard_import() {
        let issues = analyze(
            "tool.py",
            "from os import *\ntry:\n    pass\nexcept:\n    pass\n",
        );
        let lines: Vec<usize> = issues.iter().map(|issue| issue.line).collect();
        assert_eq!(lines, vec![1, 4]);
    }

    #[test]
    fn script_checks_take_first_match_per_line() {
        let issues = analyze("app.js", "el.innerHTML = eval(code);\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "Dangerous use of eval() function");
    }

    #[test]
    fn markup_flags_inline_script_and_protocol() {
        let issues = analyze(
            "index.html",
            "<script>alert(1)</script>\n<a href=\"javascript:go()\">x</a>\n",
        );
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[1].severity, Severity::Critical);
    }

    #[test]
    fn invalid_json_reports_line() {
        let issues = analyze("data.json", "{\n  \"a\": ,\n}\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 2);
        assert_eq!(issues[0].category, Category::Correctness);
    }

    #[test]
    fn generic_checks_apply_to_any_text() {
        let long = "x".repeat(MAX_LINE_CHARS + 1);
        let issues = analyze("notes.txt", &format!("{long}\ntrailing \n"));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| issue.category == Category::Style));
    }

    #[test]
    fn suggestions_for_clean_code() {
        assert_eq!(
            suggestions(&[]),
            vec!["Code looks good! No major issues detected.".to_string()]
        );
    }

    #[test]
    fn suggestions_follow_category_and_severity() {
        let issues = analyze("tool.py", "eval(x) \n");
        assert_eq!(
            suggestions(&issues),
            vec![
                "Fix critical security issue on line 1: Dangerous use of eval() function"
                    .to_string(),
                "Improve code style on line 1: Trailing whitespace detected".to_string(),
            ]
        );
    }
}
