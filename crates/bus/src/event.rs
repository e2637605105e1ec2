// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The stored `Event` type and its `index` projection (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Small projection of payload fields the store can filter on without
/// parsing the full payload again. Built once at publish time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventIndex {
    /// Project the fields the store knows how to filter on out of an
    /// arbitrary payload. Missing fields are simply absent, not an error:
    /// the store is schemaless at this layer (spec §3 "a projection of
    /// payload fields the store knows how to filter on").
    pub fn project(payload: &Value, ts: i64) -> Self {
        let get_str = |k: &str| payload.get(k).and_then(Value::as_str).map(str::to_string);
        Self {
            plugin_id: get_str("plugin_id"),
            source: get_str("source"),
            priority: payload.get("priority").and_then(Value::as_i64),
            kind: get_str("kind"),
            r#type: get_str("type"),
            timestamp: payload.get("timestamp").and_then(Value::as_i64).or(Some(ts)),
            id: get_str("id")
                .or_else(|| get_str("message_id"))
                .or_else(|| get_str("event_id"))
                .or_else(|| get_str("run_id")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub seq: u64,
    pub ts: i64,
    pub store: String,
    pub topic: String,
    pub payload: Value,
    pub index: EventIndex,
}

/// The "light" projection of an [`Event`] (spec §4.3 "Query semantics"):
/// strips `payload`, keeps the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LightEvent {
    pub seq: u64,
    pub ts: i64,
    pub store: String,
    pub topic: String,
    pub index: EventIndex,
}

impl From<&Event> for LightEvent {
    fn from(e: &Event) -> Self {
        Self { seq: e.seq, ts: e.ts, store: e.store.clone(), topic: e.topic.clone(), index: e.index.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_known_fields() {
        let payload = serde_json::json!({
            "plugin_id": "plg-a", "source": "A", "priority": 7,
            "type": "text", "id": "m1",
        });
        let idx = EventIndex::project(&payload, 1000);
        assert_eq!(idx.plugin_id.as_deref(), Some("plg-a"));
        assert_eq!(idx.priority, Some(7));
        assert_eq!(idx.id.as_deref(), Some("m1"));
    }

    #[test]
    fn falls_back_to_publish_ts_when_payload_has_none() {
        let idx = EventIndex::project(&serde_json::json!({}), 42);
        assert_eq!(idx.timestamp, Some(42));
    }

    #[test]
    fn light_event_drops_payload() {
        let e = Event {
            seq: 1,
            ts: 1,
            store: "messages".into(),
            topic: "default".into(),
            payload: serde_json::json!({"secret": true}),
            index: EventIndex::default(),
        };
        let light = LightEvent::from(&e);
        let json = serde_json::to_string(&light).unwrap();
        assert!(!json.contains("secret"));
    }
}
