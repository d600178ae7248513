// ABOUTME: Integration tests for the file-backed state store.
// ABOUTME: Atomic replacement, corrupt and foreign files, and round trips through disk.

use ci_runner::state::{RunnerState, StateStore};
use ci_runner::types::CommitSha;
use std::fs;
use tempfile::TempDir;

const REPO: &str = "acme/widgets";

fn deployed(sha: &str) -> RunnerState {
    let mut state = RunnerState::empty(REPO, "main");
    state.last_deployed_commit = Some(CommitSha::new(sha).unwrap());
    state
}

#[test]
fn missing_file_reads_as_none_and_loads_empty() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));

    assert!(store.read().unwrap().is_none());
    let state = store.load(REPO, "main");
    assert!(state.last_deployed_commit.is_none());
    assert_eq!(state.repository, REPO);
}

#[test]
fn save_then_load_returns_the_commit() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));

    store.save(&deployed("abc123")).unwrap();

    let loaded = store.load(REPO, "main");
    assert_eq!(
        loaded.last_deployed_commit.map(|s| s.to_string()).as_deref(),
        Some("abc123")
    );
}

#[test]
fn save_replaces_without_leaving_temp_files() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));

    store.save(&deployed("abc123")).unwrap();
    store.save(&deployed("def456")).unwrap();

    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["state.json"]);

    let raw = fs::read_to_string(store.path()).unwrap();
    assert!(raw.contains("\"last_deployed_commit\": \"def456\""));
}

#[test]
fn save_creates_missing_parent_directories() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("data/nested/state.json"));

    store.save(&deployed("abc123")).unwrap();
    assert!(store.path().is_file());
}

#[test]
fn corrupt_file_is_an_error_on_read_but_empty_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, "{\"last_deployed_commit\": 42").unwrap();
    let store = StateStore::new(&path);

    assert!(store.read().is_err());
    assert!(store.load(REPO, "main").last_deployed_commit.is_none());
}

#[test]
fn invalid_sha_in_file_counts_as_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, r#"{"last_deployed_commit": "not-a-sha"}"#).unwrap();

    assert!(StateStore::new(&path).load(REPO, "main").last_deployed_commit.is_none());
}

#[test]
fn state_for_another_branch_is_ignored() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    let mut other = deployed("abc123");
    other.branch = "release".to_string();
    store.save(&other).unwrap();

    assert!(store.load(REPO, "main").last_deployed_commit.is_none());
    assert!(store.load(REPO, "release").last_deployed_commit.is_some());
}

#[test]
fn minimal_legacy_file_is_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, r#"{"last_commit": "abc123"}"#).unwrap();

    let state = StateStore::new(&path).load(REPO, "main");
    assert_eq!(
        state.last_deployed_commit.map(|s| s.to_string()).as_deref(),
        Some("abc123")
    );
}
