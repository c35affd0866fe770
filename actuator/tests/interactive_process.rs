//! Interactive processes driven across several plans.

#![cfg(unix)]

use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use actuator::core::types::PlanReport;
use actuator::dispatch::{ActionDispatcher, DispatchOutcome};
use actuator::test_support::TempWorkspace;
use serde_json::json;

fn execute(dispatcher: &mut ActionDispatcher, reply: &str) -> PlanReport {
    match dispatcher.handle_reply(reply) {
        DispatchOutcome::Executed(report) => report,
        DispatchOutcome::NotAPlan(reason) => panic!("expected a plan: {reason}"),
    }
}

fn start(dispatcher: &mut ActionDispatcher, command: &str) -> u32 {
    let plan = json!({
        "explanation": "start",
        "actions": [{"type": "start_process", "command": command}],
    });
    let report = execute(dispatcher, &plan.to_string());
    assert!(report.all_succeeded(), "{}", report.render());
    report.results[0]
        .narrative
        .trim_start_matches("Started process with PID: ")
        .parse()
        .expect("pid in narrative")
}

/// Poll `read_output` through plans until a line arrives.
fn await_output(dispatcher: &mut ActionDispatcher, pid: u32) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let report = execute(
            dispatcher,
            &format!(r#"{{"actions":[{{"type":"read_output","pid":{pid}}}]}}"#),
        );
        let narrative = &report.results[0].narrative;
        if let Some(line) = narrative.strip_prefix(&format!("Output from process {pid}:\n")) {
            return line.to_string();
        }
        assert!(Instant::now() < deadline, "no output: {narrative}");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn echo_output_is_readable_until_stopped() {
    let workspace = TempWorkspace::new();
    let mut dispatcher = workspace.dispatcher();

    let pid = start(&mut dispatcher, "echo 4");
    assert_eq!(await_output(&mut dispatcher, pid), "4");

    let report = execute(
        &mut dispatcher,
        &format!(
            r#"{{"actions":[{{"type":"stop_process","pid":{pid}}},{{"type":"read_output","pid":"{pid}"}}]}}"#
        ),
    );
    assert!(report.results[0].succeeded);
    assert!(!report.results[1].succeeded);
    assert!(report.results[1].narrative.contains(&format!("no process with pid {pid}")));
}

#[test]
fn input_round_trips_through_cat() {
    let workspace = TempWorkspace::new();
    let mut dispatcher = workspace.dispatcher();

    let pid = start(&mut dispatcher, "cat");
    let report = execute(
        &mut dispatcher,
        &format!(r#"{{"actions":[{{"type":"send_input","pid":{pid},"data":"ping\n"}}]}}"#),
    );
    assert!(report.all_succeeded());
    assert_eq!(await_output(&mut dispatcher, pid), "ping");

    let metric = dispatcher
        .ledger()
        .metric("action_send_input")
        .expect("metric");
    assert_eq!(metric.success_count, 1);
}

fn is_alive(pid: u32) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {pid}"))
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn python() -> Option<&'static str> {
    ["python", "python3"].into_iter().find(|program| {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    })
}

#[test]
fn dropping_the_dispatcher_stops_children() {
    let workspace = TempWorkspace::new();
    let mut dispatcher = workspace.dispatcher();
    let pid = start(&mut dispatcher, "cat");
    assert_eq!(dispatcher.processes().list().len(), 1);
    assert!(is_alive(pid));

    drop(dispatcher);

    let deadline = Instant::now() + Duration::from_secs(5);
    while is_alive(pid) {
        assert!(Instant::now() < deadline, "process {pid} survived the dispatcher");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn python_one_liner_prints_result() {
    let Some(program) = python() else {
        return;
    };
    let workspace = TempWorkspace::new();
    let mut dispatcher = workspace.dispatcher();

    let pid = start(&mut dispatcher, &format!("{program} -c \"print(2+2)\""));
    assert_eq!(await_output(&mut dispatcher, pid), "4");

    let report = execute(
        &mut dispatcher,
        &format!(r#"{{"actions":[{{"type":"stop_process","pid":{pid}}}]}}"#),
    );
    assert_eq!(report.results[0].narrative, format!("Stopped process {pid}."));
}
