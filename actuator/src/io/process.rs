//! Registry of long-lived interactive child processes.
//!
//! Each child runs under the platform shell with piped stdio. One reader
//! thread per output stream forwards lines into a channel, so reads never
//! block: callers poll and get a line, [`StreamRead::Pending`], or
//! [`StreamRead::Closed`] once the stream hit EOF and was drained. Input goes
//! the other way through a writer thread, so a child that never reads stdin
//! cannot stall the caller.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ErrorClass;

/// Default time `stop` waits to reap a killed child.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Created,
    Running,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessState::Created => "created",
            ProcessState::Running => "running",
            ProcessState::Terminated => "terminated",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no process with pid {0}")]
    UnknownProcess(u32),
    #[error("input stream of process {0} is closed")]
    StreamClosed(u32),
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProcessError::UnknownProcess(_) => ErrorClass::NotFound,
            ProcessError::StreamClosed(_) => ErrorClass::Validation,
            ProcessError::Spawn { .. } => ErrorClass::Internal,
        }
    }
}

/// Result of one non-blocking line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRead {
    Line(String),
    /// The stream is open but has no complete line yet.
    Pending,
    /// EOF reached and every buffered line was consumed.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
    pub state: ProcessState,
}

struct LineChannel {
    lines: Receiver<String>,
}

impl LineChannel {
    fn spawn<R: Read + Send + 'static>(stream: R, pid: u32, label: &'static str) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        let text = text.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(pid, stream = label, err = %err, "reader stopped");
                        break;
                    }
                }
            }
        });
        Self { lines: rx }
    }

    fn try_line(&self) -> StreamRead {
        match self.lines.try_recv() {
            Ok(line) => StreamRead::Line(line),
            Err(TryRecvError::Empty) => StreamRead::Pending,
            Err(TryRecvError::Disconnected) => StreamRead::Closed,
        }
    }
}

struct InputChannel {
    chunks: Sender<Vec<u8>>,
}

impl InputChannel {
    fn spawn(mut stdin: ChildStdin, pid: u32) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            for chunk in rx {
                if let Err(err) = stdin.write_all(&chunk).and_then(|()| stdin.flush()) {
                    debug!(pid, err = %err, "writer stopped");
                    break;
                }
            }
        });
        Self { chunks: tx }
    }

    /// Queue `data`; `false` once the writer has stopped.
    fn send(&self, data: &[u8]) -> bool {
        self.chunks.send(data.to_vec()).is_ok()
    }
}

struct ProcessHandle {
    command: String,
    child: Child,
    stdin: Option<InputChannel>,
    stdout: LineChannel,
    stderr: LineChannel,
    state: ProcessState,
}

impl ProcessHandle {
    /// Observe a natural exit without blocking.
    fn refresh(&mut self) {
        if self.state == ProcessState::Running
            && let Ok(Some(status)) = self.child.try_wait()
        {
            debug!(pid = self.child.id(), exit_code = ?status.code(), "process exited");
            self.state = ProcessState::Terminated;
            self.stdin = None;
        }
    }
}

/// Owns every interactive child. Dropping the registry stops them all.
pub struct ProcessRegistry {
    root: PathBuf,
    stop_grace: Duration,
    table: Mutex<HashMap<u32, ProcessHandle>>,
}

impl fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("root", &self.root)
            .field("stop_grace", &self.stop_grace)
            .field("processes", &self.lock().len())
            .finish()
    }
}

impl ProcessRegistry {
    pub fn new(root: &Path, stop_grace: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            stop_grace,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, ProcessHandle>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `command` under the platform shell in the workspace root.
    #[instrument(skip_all, fields(command))]
    pub fn start(&self, command: &str) -> Result<u32, ProcessError> {
        let mut cmd = shell_command(command);
        cmd.current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let spawn_error = |source: io::Error| ProcessError::Spawn {
            command: command.to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(|err| {
            error!(err = %err, "failed to spawn process");
            spawn_error(err)
        })?;
        let pid = child.id();

        let stdin = child.stdin.take().map(|stdin| InputChannel::spawn(stdin, pid));
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            kill_and_reap(&mut child, self.stop_grace);
            return Err(spawn_error(io::Error::other("stdout/stderr was not piped")));
        };

        let mut handle = ProcessHandle {
            command: command.to_string(),
            child,
            stdin,
            stdout: LineChannel::spawn(stdout, pid, "stdout"),
            stderr: LineChannel::spawn(stderr, pid, "stderr"),
            state: ProcessState::Created,
        };
        handle.state = ProcessState::Running;
        debug!(pid, "process started");
        self.lock().insert(pid, handle);
        Ok(pid)
    }

    /// Queue `data` verbatim for the child's stdin.
    ///
    /// Returns once the data is queued. A failed write closes the input, and
    /// the next call reports [`ProcessError::StreamClosed`].
    pub fn write_input(&self, pid: u32, data: &str) -> Result<(), ProcessError> {
        let mut table = self.lock();
        let handle = table
            .get_mut(&pid)
            .ok_or(ProcessError::UnknownProcess(pid))?;
        handle.refresh();
        let input = handle
            .stdin
            .as_ref()
            .ok_or(ProcessError::StreamClosed(pid))?;
        if input.send(data.as_bytes()) {
            Ok(())
        } else {
            handle.stdin = None;
            Err(ProcessError::StreamClosed(pid))
        }
    }

    pub fn read_output(&self, pid: u32) -> Result<StreamRead, ProcessError> {
        self.with_handle(pid, |handle| handle.stdout.try_line())
    }

    pub fn read_error(&self, pid: u32) -> Result<StreamRead, ProcessError> {
        self.with_handle(pid, |handle| handle.stderr.try_line())
    }

    pub fn state(&self, pid: u32) -> Result<ProcessState, ProcessError> {
        self.with_handle(pid, |handle| handle.state)
    }

    fn with_handle<T>(
        &self,
        pid: u32,
        f: impl FnOnce(&mut ProcessHandle) -> T,
    ) -> Result<T, ProcessError> {
        let mut table = self.lock();
        let handle = table
            .get_mut(&pid)
            .ok_or(ProcessError::UnknownProcess(pid))?;
        handle.refresh();
        Ok(f(handle))
    }

    /// Forget `pid`, then kill and reap it. Works on already-exited children.
    #[instrument(skip(self))]
    pub fn stop(&self, pid: u32) -> Result<(), ProcessError> {
        let handle = self
            .lock()
            .remove(&pid)
            .ok_or(ProcessError::UnknownProcess(pid))?;
        let mut child = handle.child;
        drop(handle.stdin);
        kill_and_reap(&mut child, self.stop_grace);
        debug!(pid, "process stopped");
        Ok(())
    }

    /// Every tracked process, ordered by pid.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut table = self.lock();
        let mut infos: Vec<ProcessInfo> = table
            .iter_mut()
            .map(|(pid, handle)| {
                handle.refresh();
                ProcessInfo {
                    pid: *pid,
                    command: handle.command.clone(),
                    state: handle.state,
                }
            })
            .collect();
        infos.sort_by_key(|info| info.pid);
        infos
    }

    pub fn stop_all(&self) {
        let pids: Vec<u32> = self.lock().keys().copied().collect();
        for pid in pids {
            if let Err(err) = self.stop(pid) {
                debug!(pid, err = %err, "stop during shutdown");
            }
        }
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn kill_and_reap(child: &mut Child, grace: Duration) {
    // Killing an exited child fails harmlessly; reaping still applies.
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill failed");
    }
    match child.wait_timeout(grace) {
        Ok(Some(status)) => debug!(exit_code = ?status.code(), "process reaped"),
        Ok(None) => warn!(
            pid = child.id(),
            grace_ms = grace.as_millis() as u64,
            "process did not exit within grace period"
        ),
        Err(err) => warn!(pid = child.id(), err = %err, "failed to reap process"),
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    fn registry() -> (tempfile::TempDir, ProcessRegistry) {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = ProcessRegistry::new(temp.path(), DEFAULT_STOP_GRACE);
        (temp, registry)
    }

    fn poll(mut read: impl FnMut() -> Result<StreamRead, ProcessError>) -> StreamRead {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match read().expect("read") {
                StreamRead::Pending if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                other => return other,
            }
        }
    }

    #[test]
    fn echo_output_then_stop_forgets_pid() {
        let (_temp, registry) = registry();
        let pid = registry.start("echo 4").expect("start");

        assert_eq!(
            poll(|| registry.read_output(pid)),
            StreamRead::Line("4".to_string())
        );
        assert_eq!(poll(|| registry.read_output(pid)), StreamRead::Closed);

        registry.stop(pid).expect("stop");
        assert!(matches!(
            registry.read_output(pid),
            Err(ProcessError::UnknownProcess(p)) if p == pid
        ));
    }

    #[test]
    fn cat_echoes_written_input() {
        let (_temp, registry) = registry();
        let pid = registry.start("cat").expect("start");

        registry.write_input(pid, "hello\n").expect("write");
        assert_eq!(
            poll(|| registry.read_output(pid)),
            StreamRead::Line("hello".to_string())
        );
        assert_eq!(registry.state(pid).expect("state"), ProcessState::Running);
        registry.stop(pid).expect("stop");
    }

    #[test]
    fn large_input_to_idle_child_does_not_block() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(ProcessRegistry::new(temp.path(), DEFAULT_STOP_GRACE));
        let pid = registry.start("sleep 30").expect("start");

        let (done_tx, done_rx) = mpsc::channel();
        let writer = Arc::clone(&registry);
        thread::spawn(move || {
            let data = "x".repeat(1024 * 1024);
            let _ = done_tx.send(writer.write_input(pid, &data).is_ok());
        });

        let queued = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("write_input returned");
        assert!(queued);
        assert_eq!(registry.read_output(pid).expect("read"), StreamRead::Pending);
        registry.stop(pid).expect("stop");
    }

    #[test]
    fn stderr_is_read_separately() {
        let (_temp, registry) = registry();
        let pid = registry.start("echo oops 1>&2").expect("start");

        assert_eq!(
            poll(|| registry.read_error(pid)),
            StreamRead::Line("oops".to_string())
        );
        assert_eq!(poll(|| registry.read_output(pid)), StreamRead::Closed);
        registry.stop(pid).expect("stop");
    }

    #[test]
    fn runs_in_workspace_root() {
        let (temp, registry) = registry();
        std::fs::write(temp.path().join("marker.txt"), "").expect("seed");
        let pid = registry.start("ls").expect("start");

        assert_eq!(
            poll(|| registry.read_output(pid)),
            StreamRead::Line("marker.txt".to_string())
        );
        registry.stop(pid).expect("stop");
    }

    #[test]
    fn exited_process_rejects_input_but_keeps_output() {
        let (_temp, registry) = registry();
        let pid = registry.start("echo done").expect("start");

        let deadline = Instant::now() + Duration::from_secs(10);
        while registry.state(pid).expect("state") != ProcessState::Terminated {
            assert!(Instant::now() < deadline, "process never exited");
            thread::sleep(Duration::from_millis(10));
        }

        assert!(matches!(
            registry.write_input(pid, "x"),
            Err(ProcessError::StreamClosed(_))
        ));
        assert_eq!(
            poll(|| registry.read_output(pid)),
            StreamRead::Line("done".to_string())
        );
        registry.stop(pid).expect("stop after exit");
    }

    #[test]
    fn unknown_pid_is_reported() {
        let (_temp, registry) = registry();
        assert!(matches!(
            registry.write_input(1, "x"),
            Err(ProcessError::UnknownProcess(1))
        ));
        assert!(matches!(registry.stop(1), Err(ProcessError::UnknownProcess(1))));
        assert_eq!(ProcessError::UnknownProcess(1).class(), ErrorClass::NotFound);
    }

    #[test]
    fn list_reports_commands_and_stop_all_clears() {
        let (_temp, registry) = registry();
        let pid = registry.start("cat").expect("start");

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].pid, pid);
        assert_eq!(listed[0].command, "cat");

        registry.stop_all();
        assert!(registry.list().is_empty());
    }
}
