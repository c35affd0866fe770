//! Git collaborator for `git_commit` actions.
//!
//! A small, explicit wrapper around `git` subprocess calls in the workspace.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Result of a commit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// Version-control operations the dispatcher needs.
pub trait GitOps {
    /// Stage every change in the workspace (respects .gitignore).
    fn stage_all(&self) -> Result<()>;

    /// Commit whatever is staged.
    fn commit(&self, message: &str) -> Result<CommitOutcome>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if the workdir is inside a git work tree.
    pub fn is_repository(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl GitOps for Git {
    #[instrument(skip_all)]
    fn stage_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// If nothing is staged this does nothing and reports
    /// [`CommitOutcome::NothingToCommit`].
    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<CommitOutcome> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(CommitOutcome::NothingToCommit);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    #[test]
    fn non_repository_is_detected() {
        if !git_available() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!Git::new(temp.path()).is_repository());
    }

    #[test]
    fn empty_index_commits_nothing() {
        if !git_available() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        git.run_checked(&["init", "--quiet"]).expect("init");
        assert!(git.is_repository());

        git.stage_all().expect("stage");
        assert_eq!(
            git.commit("nothing here").expect("commit"),
            CommitOutcome::NothingToCommit
        );
    }

    #[test]
    fn staging_outside_repository_fails() {
        if !git_available() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Git::new(temp.path()).stage_all().unwrap_err();
        assert!(err.to_string().contains("git add -A failed"));
    }
}
