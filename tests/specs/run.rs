//! Run protocol specs (spec §6/§8 S6), exercised through `pb run …`. Run
//! creation doesn't require a live plugin — `RunManager::create` only mints
//! a `Queued` record; dispatching it is the HTTP collaborator's job, out of
//! this core's scope — so these specs only cover the state machine itself.

use crate::prelude::*;

#[test]
fn create_then_get_round_trips_a_queued_run() {
    let daemon = Daemon::start();

    let created = run_ok(daemon.cli().args([
        "--format",
        "json",
        "run",
        "create",
        "plg-testplugin",
        "echo",
        r#"{"text":"world"}"#,
    ]));
    let created: serde_json::Value = serde_json::from_str(&created).unwrap();
    assert_eq!(created["status"], "queued");
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let fetched = run_ok(daemon.cli().args(["--format", "json", "run", "get", &run_id]));
    let fetched: serde_json::Value = serde_json::from_str(&fetched).unwrap();
    assert_eq!(fetched["run_id"], run_id);
    assert_eq!(fetched["status"], "queued");
    assert_eq!(fetched["plugin_id"], "plg-testplugin");
    assert_eq!(fetched["entry_id"], "echo");
}

#[test]
fn cancel_queued_run_commits_canceled_immediately() {
    let daemon = Daemon::start();

    let created = run_ok(daemon.cli().args(["--format", "json", "run", "create", "plg-testplugin", "echo"]));
    let created: serde_json::Value = serde_json::from_str(&created).unwrap();
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let canceled = run_ok(daemon.cli().args(["--format", "json", "run", "cancel", &run_id]));
    let canceled: serde_json::Value = serde_json::from_str(&canceled).unwrap();
    assert_eq!(canceled["status"], "canceled");

    // a second cancel on an already-terminal run is a validation error, exit code 3.
    let stderr = run_err(daemon.cli().args(["run", "cancel", &run_id]));
    assert!(stderr.contains("already terminal"), "stderr: {stderr}");
}

#[test]
fn get_of_an_unknown_run_id_is_not_found() {
    let daemon = Daemon::start();
    let stderr = run_err(daemon.cli().args(["run", "get", "run-doesnotexist00000"]));
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn export_list_is_empty_for_a_freshly_created_run() {
    let daemon = Daemon::start();
    let created = run_ok(daemon.cli().args(["--format", "json", "run", "create", "plg-testplugin", "echo"]));
    let created: serde_json::Value = serde_json::from_str(&created).unwrap();
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let out = run_ok(daemon.cli().args(["--format", "json", "run", "export", &run_id]));
    let items: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
    assert!(items.is_empty());
}
