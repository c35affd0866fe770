//! Test-only helpers: scratch workspaces and scripted collaborators.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::dispatch::ActionDispatcher;
use crate::io::chat::{ChatMessage, ChatModel};
use crate::io::config::EngineConfig;
use crate::io::git::{CommitOutcome, GitOps};
use crate::io::search::WebSearch;

/// A temporary workspace root, removed on drop.
pub struct TempWorkspace {
    dir: TempDir,
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl TempWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn with_file(self, relative: &str, contents: &str) -> Self {
        self.write(relative, contents);
        self
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).expect("read file")
    }

    /// Default config with every read admitted to the cache.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cache.min_read_duration_ms = 0;
        config
    }

    pub fn dispatcher(&self) -> ActionDispatcher {
        ActionDispatcher::from_config(self.path(), &self.config()).expect("dispatcher")
    }
}

/// Search collaborator with a fixed answer that records every query.
pub struct ScriptedSearch {
    answer: Option<String>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSearch {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            queries: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            queries: Arc::default(),
        }
    }

    pub fn queries(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.queries)
    }
}

impl WebSearch for ScriptedSearch {
    fn search(&mut self, query: &str) -> Result<String> {
        self.queries.lock().expect("queries").push(query.to_string());
        self.answer
            .clone()
            .ok_or_else(|| anyhow!("search backend unavailable"))
    }
}

/// Git collaborator that records calls instead of running git.
pub struct RecordingGit {
    outcome: CommitOutcome,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingGit {
    pub fn committing() -> Self {
        Self::with_outcome(CommitOutcome::Committed)
    }

    pub fn with_outcome(outcome: CommitOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl GitOps for RecordingGit {
    fn stage_all(&self) -> Result<()> {
        self.calls.lock().expect("calls").push("stage_all".to_string());
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome> {
        self.calls
            .lock()
            .expect("calls")
            .push(format!("commit {message}"));
        Ok(self.outcome)
    }
}

/// Chat model that replays scripted replies and records each transcript.
///
/// `Err` entries simulate provider failures.
pub struct ScriptedChat {
    replies: VecDeque<Result<String, String>>,
    transcripts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedChat {
    pub fn new(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            transcripts: Arc::default(),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|reply| Ok(reply.to_string())))
    }

    pub fn transcripts(&self) -> Arc<Mutex<Vec<Vec<ChatMessage>>>> {
        Arc::clone(&self.transcripts)
    }
}

impl ChatModel for ScriptedChat {
    fn chat(&mut self, messages: &[ChatMessage]) -> Result<String> {
        self.transcripts
            .lock()
            .expect("transcripts")
            .push(messages.to_vec());
        match self.replies.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Err(anyhow!("no scripted reply left")),
        }
    }
}
