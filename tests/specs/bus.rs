//! Bus store specs (spec §8 S3, S5) driven entirely through `pb bus …`
//! against a real `plugboardd` — no plugin process is needed since these
//! ops don't check caller liveness.

use crate::prelude::*;

#[test]
fn query_after_push_finds_the_record_by_source_and_priority() {
    let daemon = Daemon::start();

    run_ok(daemon.cli().args([
        "bus",
        "publish",
        "messages",
        "main",
        r#"{"id":"m1","source":"A","plugin_id":"A","priority":7,"content":"hi"}"#,
    ]));

    let out = run_ok(daemon.cli().args([
        "--format",
        "json",
        "bus",
        "query",
        "messages",
        "--source",
        "A",
        "--priority-min",
        "5",
    ]));
    let events: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["index"]["id"], "m1");
    assert_eq!(events[0]["index"]["source"], "A");
}

#[test]
fn delete_tombstones_the_id_so_a_republish_is_silently_dropped() {
    let daemon = Daemon::start();

    run_ok(daemon.cli().args(["bus", "publish", "messages", "main", r#"{"id":"m1","content":"first"}"#]));

    let recent = run_ok(daemon.cli().args(["--format", "json", "bus", "get-recent", "messages", "main"]));
    let events: Vec<serde_json::Value> = serde_json::from_str(&recent).unwrap();
    assert_eq!(events.len(), 1);

    run_ok(daemon.cli().args(["bus", "delete", "messages", "m1"]));

    let after_delete =
        run_ok(daemon.cli().args(["--format", "json", "bus", "get-recent", "messages", "main"]));
    let events: Vec<serde_json::Value> = serde_json::from_str(&after_delete).unwrap();
    assert!(events.is_empty(), "deleted id should be gone: {events:?}");

    // republishing the same id is a silent no-op, not a resurrection.
    run_ok(daemon.cli().args(["bus", "publish", "messages", "main", r#"{"id":"m1","content":"second"}"#]));
    let after_republish =
        run_ok(daemon.cli().args(["--format", "json", "bus", "get-recent", "messages", "main"]));
    let events: Vec<serde_json::Value> = serde_json::from_str(&after_republish).unwrap();
    assert!(events.is_empty(), "tombstoned id must not be re-inserted: {events:?}");
}

#[test]
fn list_topics_reflects_published_topics() {
    let daemon = Daemon::start();
    run_ok(daemon.cli().args(["bus", "publish", "events", "alpha", r#"{"id":"e1"}"#]));
    run_ok(daemon.cli().args(["bus", "publish", "events", "beta", r#"{"id":"e2"}"#]));

    let out = run_ok(daemon.cli().args(["--format", "json", "bus", "list-topics", "events"]));
    let topics: Vec<String> = serde_json::from_str(&out).unwrap();
    assert!(topics.contains(&"alpha".to_string()));
    assert!(topics.contains(&"beta".to_string()));
}
