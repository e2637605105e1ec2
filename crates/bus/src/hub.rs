// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The change-notification hub (spec §3 `BusChangeHub`). Per-bus map of
//! subscriber-id to a channel; writers emit a structured change payload
//! under a small critical section and callbacks only enqueue (Design
//! Notes: "mandate that callbacks only enqueue onto a bounded channel").

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pb_core::bus_name::BusName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The structured change payload emitted to the hub on every mutation
/// (spec §4.3 step 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub bus: BusName,
    pub op: ChangeOp,
    pub rev: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default)]
    pub batch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Add,
    Del,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Del => "del",
        }
    }
}

type SubscriberId = pb_core::ids::SubscriptionId;

/// Bound on the per-subscriber mailbox. A slow subscriber backs up here,
/// not in the writer's critical section; the bus subscription dispatcher
/// (in `pb-host`) is the consumer that drains it.
const MAILBOX_CAPACITY: usize = 1024;

pub struct BusChangeHub {
    subscribers: RwLock<HashMap<BusName, HashMap<SubscriberId, tokio::sync::mpsc::Sender<ChangeEvent>>>>,
}

impl Default for BusChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BusChangeHub {
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(HashMap::new()) }
    }

    /// Register a new mailbox for `sub_id` on `bus`, returning the receiving
    /// half for the caller's dispatch loop to drain.
    pub fn register(&self, bus: BusName, sub_id: SubscriberId) -> tokio::sync::mpsc::Receiver<ChangeEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(MAILBOX_CAPACITY);
        self.subscribers.write().entry(bus).or_default().insert(sub_id, tx);
        rx
    }

    pub fn unregister(&self, bus: BusName, sub_id: SubscriberId) {
        if let Some(table) = self.subscribers.write().get_mut(&bus) {
            table.remove(&sub_id);
        }
    }

    /// Emit `event` to every subscriber on `event.bus`. Copies the callback
    /// list under the lock then sends outside it, per spec invariant 6 ("no
    /// call from within a bus-change callback may synchronously wait on a
    /// subscriber"). A full mailbox is logged and dropped rather than
    /// blocking the writer — the dispatcher's own circuit breaker (spec
    /// §4.4) is what should notice and pause a chronically slow consumer.
    pub fn emit(&self, event: ChangeEvent) {
        let senders: Vec<_> = {
            let table = self.subscribers.read();
            table.get(&event.bus).map(|m| m.values().cloned().collect()).unwrap_or_default()
        };
        for tx in senders {
            if tx.try_send(event.clone()).is_err() {
                tracing::warn!(bus = %event.bus, "change hub mailbox full or closed, dropping");
            }
        }
    }

    pub fn subscriber_count(&self, bus: BusName) -> usize {
        self.subscribers.read().get(&bus).map(HashMap::len).unwrap_or(0)
    }
}

pub type SharedBusChangeHub = Arc<BusChangeHub>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_subscriber_receives_emitted_event() {
        let hub = BusChangeHub::new();
        let sub_id = SubscriberId::new();
        let mut rx = hub.register(BusName::Messages, sub_id);
        hub.emit(ChangeEvent {
            bus: BusName::Messages,
            op: ChangeOp::Add,
            rev: 1,
            id: Some("m1".into()),
            priority: None,
            source: None,
            count: None,
            batch: false,
            payload: None,
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.rev, 1);
    }

    #[tokio::test]
    async fn unregistered_subscriber_gets_nothing() {
        let hub = BusChangeHub::new();
        let sub_id = SubscriberId::new();
        let mut rx = hub.register(BusName::Events, sub_id);
        hub.unregister(BusName::Events, sub_id);
        hub.emit(ChangeEvent {
            bus: BusName::Events,
            op: ChangeOp::Add,
            rev: 1,
            id: None,
            priority: None,
            source: None,
            count: None,
            batch: false,
            payload: None,
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn different_bus_subscribers_are_isolated() {
        let hub = BusChangeHub::new();
        let _rx = hub.register(BusName::Messages, SubscriberId::new());
        assert_eq!(hub.subscriber_count(BusName::Messages), 1);
        assert_eq!(hub.subscriber_count(BusName::Events), 0);
    }
}
