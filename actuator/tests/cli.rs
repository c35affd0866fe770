//! CLI tests for the `actuator` binary.
//!
//! Spawns the binary and checks exit codes and printed reports.

use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};

use actuator::exit_codes;
use actuator::io::config::{config_path, load_config};

fn actuator() -> Command {
    Command::new(env!("CARGO_BIN_EXE_actuator"))
}

#[test]
fn check_command_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    for (command, expected) in [
        ("ls -la", exit_codes::OK),
        ("ls; rm -rf /", exit_codes::BLOCKED),
        ("echo $(whoami)", exit_codes::BLOCKED),
        ("cat a && cat b", exit_codes::BLOCKED),
        ("SHUTDOWN now", exit_codes::BLOCKED),
    ] {
        let status = actuator()
            .args(["check-command", command, "--workspace"])
            .arg(temp.path())
            .status()
            .expect("check-command");
        assert_eq!(status.code(), Some(expected), "{command}");
    }
}

#[test]
fn init_writes_loadable_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = actuator()
        .args(["init", "--workspace"])
        .arg(temp.path())
        .status()
        .expect("init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    load_config(&config_path(temp.path())).expect("config loads");

    let again = actuator()
        .args(["init", "--workspace"])
        .arg(temp.path())
        .status()
        .expect("init again");
    assert_eq!(again.code(), Some(exit_codes::INVALID));
}

#[test]
fn run_executes_plan_files_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = temp.path().join("first.json");
    let second = temp.path().join("second.json");
    fs::write(
        &first,
        r#"{"explanation":"write","actions":[{"type":"write_file","path":"out/a.txt","content":"one"}]}"#,
    )
    .expect("write plan");
    fs::write(
        &second,
        r#"{"explanation":"append","actions":[{"type":"append_to_file","path":"out/a.txt","content":" two"}]}"#,
    )
    .expect("write plan");

    let output = actuator()
        .args(["run", "--workspace"])
        .arg(temp.path())
        .arg("--plan")
        .arg(&first)
        .arg("--plan")
        .arg(&second)
        .output()
        .expect("run");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout,
        "Plan: write\nWrote `out/a.txt`.\nPlan: append\nAppended to `out/a.txt`.\n"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("out/a.txt")).expect("read"),
        "one two"
    );
}

#[test]
fn run_reports_failed_actions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut child = actuator()
        .args(["run", "--workspace"])
        .arg(temp.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(br#"{"actions":[{"type":"read_file","path":"missing.txt"}]}"#)
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");

    assert_eq!(output.status.code(), Some(exit_codes::ACTION_FAILED));
    assert!(String::from_utf8_lossy(&output.stdout).contains("file not found: missing.txt"));
}

#[test]
fn run_echoes_conversational_input() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = temp.path().join("reply.txt");
    fs::write(&plan, "Sure, which module should I refactor?\n").expect("write");

    let output = actuator()
        .args(["run", "--workspace"])
        .arg(temp.path())
        .arg("--plan")
        .arg(&plan)
        .output()
        .expect("run");

    assert_eq!(output.status.code(), Some(exit_codes::NOT_A_PLAN));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Sure, which module should I refactor?\n"
    );
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let status = actuator().arg("explode").status().expect("run");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[cfg(target_os = "linux")]
#[test]
fn persisted_metrics_survive_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cache_home = tempfile::tempdir().expect("cache home");
    let workspace = temp.path().join("ws");
    fs::create_dir_all(&workspace).expect("mkdir");
    fs::create_dir_all(workspace.join(".actuator")).expect("mkdir");
    fs::write(
        config_path(&workspace),
        "[cache]\npersist = true\nmin_read_duration_ms = 0\n",
    )
    .expect("config");
    fs::write(workspace.join("a.txt"), "hi").expect("seed");
    let plan = temp.path().join("plan.json");
    fs::write(&plan, r#"{"actions":[{"type":"read_file","path":"a.txt"}]}"#).expect("plan");

    for _ in 0..2 {
        let status = actuator()
            .env("XDG_CACHE_HOME", cache_home.path())
            .args(["run", "--workspace"])
            .arg(&workspace)
            .arg("--plan")
            .arg(&plan)
            .status()
            .expect("run");
        assert_eq!(status.code(), Some(exit_codes::OK));
    }

    let output = actuator()
        .env("XDG_CACHE_HOME", cache_home.path())
        .args(["metrics", "--workspace"])
        .arg(&workspace)
        .output()
        .expect("metrics");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("action_read_file: count=2 ok=2 failed=0"), "{stdout}");
    assert!(stdout.contains("cached reads: 1"), "{stdout}");
}
