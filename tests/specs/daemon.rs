//! Smallest possible round trips against a real `plugboardd`: `ping` and
//! `health` over the fast plane.

use crate::prelude::*;

#[test]
fn ping_round_trips_against_a_live_daemon() {
    let daemon = Daemon::start();
    let out = run_ok(daemon.cli().arg("ping"));
    assert!(out.contains("pong"));
}

#[test]
fn health_reports_no_plugins_when_none_are_loaded() {
    let daemon = Daemon::start();
    let out = run_ok(daemon.cli().args(["--format", "json", "health"]));
    let v: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(v["plugins"].as_array().unwrap().len(), 0);
}

#[test]
fn plugin_list_is_empty_with_no_manifests() {
    let daemon = Daemon::start();
    let out = run_ok(daemon.cli().args(["plugin", "list"]));
    assert!(out.contains("No plugins registered"));
}
