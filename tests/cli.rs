// ABOUTME: Integration tests for the ci-runner CLI commands.
// ABOUTME: Validates --help, status, and config output without a cluster.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const SETTINGS_VARS: &[&str] = &[
    "REPO",
    "BRANCH",
    "IMAGE",
    "CHART_PATH",
    "RELEASE",
    "GIT_TOKEN",
    "STATE_PATH",
    "CA_BUNDLE_PATH",
];

fn runner_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ci-runner"));
    for var in SETTINGS_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_shows_commands() {
    runner_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("tick"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn status_without_state_file_says_so() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = temp_dir.path().join("runner-state.json");

    runner_cmd()
        .args(["status", "--state-path"])
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains("No deployment recorded"));
}

#[test]
fn status_prints_recorded_commit() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = temp_dir.path().join("runner-state.json");
    fs::write(
        &state,
        r#"{"repository":"acme/widgets","branch":"main","last_deployed_commit":"abc123","updated_at":"2026-01-01T00:00:00Z","updated_by":"runner-0"}"#,
    )
    .unwrap();

    runner_cmd()
        .env("STATE_PATH", &state)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"last_deployed_commit\": \"abc123\""));
}

#[test]
fn status_fails_on_corrupt_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = temp_dir.path().join("runner-state.json");
    fs::write(&state, "garbage").unwrap();

    runner_cmd()
        .args(["status", "--state-path"])
        .arg(&state)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse"));
}

#[test]
fn config_without_required_settings_exits_non_zero() {
    runner_cmd()
        .arg("config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing required environment variable"));
}

#[test]
fn config_prints_redacted_settings() {
    runner_cmd()
        .env("REPO", "acme/widgets")
        .env("IMAGE", "ghcr.io/acme/widgets")
        .env("CHART_PATH", "chart")
        .env("RELEASE", "widgets")
        .env("GIT_TOKEN", "ghp_supersecret")
        .args(["config", "--state-path", "/tmp/elsewhere.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"repo\": \"acme/widgets\""))
        .stdout(predicate::str::contains("\"state_path\": \"/tmp/elsewhere.json\""))
        .stdout(predicate::str::contains("ghp_supersecret").not());
}
