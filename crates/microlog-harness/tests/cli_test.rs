//! Integration test: microlog-harness CLI
//!
//! Validates that:
//! 1. `run` against a conforming producer exits 0 and writes the markdown
//!    report, JSON report, event log, and artifact index.
//! 2. `run` exits non-zero when a scenario fails.
//! 3. `validate-log` accepts the log `run` wrote.
//! 4. `parse` prints captured records as JSON and rejects malformed lines.
//! 5. `probe-env` reports that the mock producer needs no preload.
//!
//! Run: cargo test -p microlog-harness --test cli_test

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn harness() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_microlog-harness"));
    cmd.env_remove("MOCK_PRODUCER_FAULT")
        .env_remove("MOCK_PRODUCER_FLAVOR")
        .env_remove("MICROLOG_ENDPOINT")
        .env_remove("MICROLOG_DRAIN_TIMEOUT_MS")
        .env_remove("MICROLOG_FILE_GRACE_MS");
    cmd
}

fn mock_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock-producer"))
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("harness.json");
    let config = serde_json::json!({
        "binary": mock_binary(),
        "endpoint": "127.0.0.1:0",
        "drain_timeout_ms": 2000,
        "file_grace_ms": 20,
    });
    std::fs::write(&path, config.to_string()).expect("write config");
    path
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn run_writes_reports_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let report = dir.path().join("report.md");
    let log = dir.path().join("events.jsonl");

    let output = harness()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--report")
        .arg(&report)
        .arg("--log")
        .arg(&log)
        .output()
        .expect("spawn harness");
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let md = std::fs::read_to_string(&report).unwrap();
    assert!(md.contains("# micro_logger Verification Report"));
    assert!(md.contains("| cpp::singleton::network | network | PASS |"));
    assert!(md.contains("- Failed: 0"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report.with_extension("json")).unwrap())
            .unwrap();
    assert_eq!(json["summary"]["failed"], 0);
    assert_eq!(json["flavor"], "cpp");

    let index: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("report.artifacts.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(index["artifacts"].as_array().unwrap().len(), 3);
    assert_eq!(index["artifacts"][2]["kind"], "event_log");

    let validated = harness()
        .arg("validate-log")
        .arg(&log)
        .output()
        .expect("spawn harness");
    assert!(validated.status.success(), "stderr: {}", stderr(&validated));
}

#[test]
fn run_fails_when_a_scenario_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = harness()
        .env("MOCK_PRODUCER_FAULT", "wrong_message")
        .args(["run", "--scenario", "hello_world", "--transport", "stdout"])
        .arg("--skip-invocations")
        .arg("--config")
        .arg(&config)
        .output()
        .expect("spawn harness");
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("FAIL cpp::hello_world::stdout"), "stderr: {err}");
    assert!(err.contains("1 of 1 checks failed"), "stderr: {err}");
}

#[test]
fn run_rejects_unknown_scenario() {
    let output = harness()
        .args(["run", "--scenario", "goodbye"])
        .arg("--binary")
        .arg(mock_binary())
        .output()
        .expect("spawn harness");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown scenario 'goodbye'"));
}

#[test]
fn parse_prints_records_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("capture.log");
    std::fs::write(
        &capture,
        "[16/10/26 10:00:00.000][CRITI][pid:00000042][tid:0000000000000042][demo.cpp:066::msg_critical][run out of chocolate for 1 time!]\n",
    )
    .unwrap();

    let output = harness().arg("parse").arg(&capture).output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(records[0]["level"], "CRITICAL");
    assert_eq!(records[0]["line"], "066");

    std::fs::write(&capture, "not a record\n").unwrap();
    let output = harness().arg("parse").arg(&capture).output().unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("MalformedRecord"));
}

#[test]
fn probe_env_reports_no_preload_for_plain_binary() {
    let output = harness()
        .arg("probe-env")
        .arg("--binary")
        .arg(mock_binary())
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let decision: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(decision["kind"], "not_required");
}
