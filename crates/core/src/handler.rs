// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The handler descriptor shape the child reports over `status_ch` once at
//! boot (`spec.md` §4.5 "Handler registry & static scan", SPEC_FULL.md §6).
//! Lives in `pb-core` rather than `pb-host` so `pb-adapters::queues` can
//! carry it on `PluginStatus::Ready` without a host -> adapters dependency
//! cycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of entry a handler is (`spec.md` §3 "entries_by_kind").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    PluginEntry,
    Lifecycle,
    Timer,
    Message,
    Custom,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PluginEntry => "plugin_entry",
            Self::Lifecycle => "lifecycle",
            Self::Timer => "timer",
            Self::Message => "message",
            Self::Custom => "custom",
        }
    }
}

/// Worker-mode dispatch parameters (`spec.md` §4.1 "Dispatch rules").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub pool_size: usize,
    pub per_call_timeout_ms: u64,
}

/// What the child reports about one handler when it boots (Design Notes:
/// "a tagged-variant descriptor struct accompanying each handler").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub event_type: String,
    pub event_id: String,
    /// The plugin-internal method name, kept for diagnostic fallback when it
    /// differs from `event_id` (`spec.md` §4.5).
    pub method_name: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
    pub kind: HandlerKind,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub worker_spec: Option<WorkerSpec>,
    #[serde(default)]
    pub checkpoint_on_success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_json() {
        let descriptor = HandlerDescriptor {
            event_type: "plugin_entry".to_string(),
            event_id: "echo".to_string(),
            method_name: "echo".to_string(),
            input_schema: None,
            kind: HandlerKind::PluginEntry,
            auto_start: false,
            worker_spec: None,
            checkpoint_on_success: false,
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: HandlerDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, "echo");
    }
}
