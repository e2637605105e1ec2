// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single named bus: topic rings, tombstones, revision counter, and the
//! publish/query/delete operations of spec §4.3.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pb_core::bus_name::BusName;
use serde_json::Value;
use thiserror::Error;

use crate::event::{Event, EventIndex, LightEvent};
use crate::hub::{BusChangeHub, ChangeEvent, ChangeOp};
use crate::store::{TopicMeta, TopicRing};
use crate::tombstone::TombstoneSet;

/// Topic name length cap (spec §4.3 "long-topic-name limits (e.g. 256 chars)").
pub const MAX_TOPIC_NAME_LEN: usize = 256;
/// Topic count cap per bus (spec §4.3 "global topic count per bus is capped (e.g. 1 024)").
pub const MAX_TOPICS_PER_BUS: usize = 1_024;
/// Payload size cap (spec §4.3 "Payload size has a hard cap (e.g. 1 MiB)").
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("topic name '{0}' exceeds {MAX_TOPIC_NAME_LEN} characters")]
    TopicNameTooLong(String),
    #[error("bus already has {MAX_TOPICS_PER_BUS} topics, cannot create '{0}'")]
    TooManyTopics(String),
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_BYTES} byte cap")]
    PayloadTooLarge(usize),
}

struct Inner {
    topics: HashMap<String, TopicRing>,
    meta: HashMap<String, TopicMeta>,
    tombstones: TombstoneSet,
    seq_counter: u64,
    /// Monotonic per-bus revision (spec §3 invariant 3: bumped exactly once
    /// per mutating operation). `u64`, saturating — see DESIGN.md Open
    /// Question 2.
    revision: u64,
}

/// One of the per-bus stores (`messages`, `events`, `lifecycle`, `runs`,
/// `export`, `memory`). Single-writer lock, many concurrent readers take a
/// short snapshot under the same lock (spec §5 "Shared-resource policy").
pub struct Bus {
    name: BusName,
    maxlen: usize,
    inner: Mutex<Inner>,
    hub: Arc<BusChangeHub>,
}

impl Bus {
    pub fn new(name: BusName, maxlen: usize, hub: Arc<BusChangeHub>) -> Self {
        Self {
            name,
            maxlen,
            inner: Mutex::new(Inner {
                topics: HashMap::new(),
                meta: HashMap::new(),
                tombstones: TombstoneSet::new(crate::tombstone::DEFAULT_CAPACITY),
                seq_counter: 0,
                revision: 0,
            }),
            hub,
        }
    }

    pub fn name(&self) -> BusName {
        self.name
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    fn validate_topic(inner: &Inner, topic: &str) -> Result<(), BusError> {
        if topic.len() > MAX_TOPIC_NAME_LEN {
            return Err(BusError::TopicNameTooLong(topic.to_string()));
        }
        if !inner.topics.contains_key(topic) && inner.topics.len() >= MAX_TOPICS_PER_BUS {
            return Err(BusError::TooManyTopics(topic.to_string()));
        }
        Ok(())
    }

    fn validate_payload(payload: &Value) -> Result<(), BusError> {
        let size = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0);
        if size > MAX_PAYLOAD_BYTES {
            return Err(BusError::PayloadTooLarge(size));
        }
        Ok(())
    }

    /// Publish algorithm, spec §4.3 steps 1-8. Returns `None` if the
    /// payload's id is tombstoned (silent drop, invariant 2).
    pub fn publish(&self, topic: &str, payload: Value, ts: i64) -> Result<Option<Event>, BusError> {
        Self::validate_payload(&payload)?;
        let idx = EventIndex::project(&payload, ts);
        let mut inner = self.inner.lock();
        Self::validate_topic(&inner, topic)?;

        if let Some(id) = &idx.id {
            if inner.tombstones.contains(id) {
                return Ok(None);
            }
        }

        inner.seq_counter += 1;
        let seq = inner.seq_counter;
        let event = Event {
            seq,
            ts,
            store: self.name.as_str().to_string(),
            topic: topic.to_string(),
            payload,
            index: idx.clone(),
        };

        let ring = inner.topics.entry(topic.to_string()).or_default();
        ring.push(event.clone(), self.maxlen);
        inner
            .meta
            .entry(topic.to_string())
            .and_modify(|m| {
                m.last_ts = ts;
                m.count_total += 1;
            })
            .or_insert(TopicMeta { created_at: ts, last_ts: ts, count_total: 1 });

        inner.revision = inner.revision.saturating_add(1);
        let rev = inner.revision;
        drop(inner);

        self.hub.emit(ChangeEvent {
            bus: self.name,
            op: ChangeOp::Add,
            rev,
            id: idx.id,
            priority: idx.priority,
            source: idx.source,
            count: None,
            batch: false,
            payload: None,
        });
        Ok(Some(event))
    }

    /// Batched publish hot path (spec §4.3 `extend_coalesced`). If no
    /// tombstones exist, skips per-record id checks and emits one
    /// coalesced change event; otherwise falls back to per-record
    /// `publish`.
    pub fn extend_coalesced(
        &self,
        topic: &str,
        payloads: Vec<Value>,
        ts: i64,
    ) -> Result<Vec<Event>, BusError> {
        for p in &payloads {
            Self::validate_payload(p)?;
        }
        let mut inner = self.inner.lock();
        Self::validate_topic(&inner, topic)?;

        if !inner.tombstones.is_empty() {
            drop(inner);
            let mut applied = Vec::new();
            for p in payloads {
                if let Some(e) = self.publish(topic, p, ts)? {
                    applied.push(e);
                }
            }
            return Ok(applied);
        }

        let mut events = Vec::with_capacity(payloads.len());
        for payload in payloads {
            inner.seq_counter += 1;
            let seq = inner.seq_counter;
            let idx = EventIndex::project(&payload, ts);
            events.push(Event {
                seq,
                ts,
                store: self.name.as_str().to_string(),
                topic: topic.to_string(),
                payload,
                index: idx,
            });
        }
        let ring = inner.topics.entry(topic.to_string()).or_default();
        for e in &events {
            ring.push(e.clone(), self.maxlen);
        }
        let count = events.len() as u64;
        inner
            .meta
            .entry(topic.to_string())
            .and_modify(|m| {
                m.last_ts = ts;
                m.count_total += count;
            })
            .or_insert(TopicMeta { created_at: ts, last_ts: ts, count_total: count });

        inner.revision = inner.revision.saturating_add(1);
        let rev = inner.revision;
        let last = events.last().map(|e| e.index.clone());
        drop(inner);

        self.hub.emit(ChangeEvent {
            bus: self.name,
            op: ChangeOp::Add,
            rev,
            id: last.as_ref().and_then(|i| i.id.clone()),
            priority: last.as_ref().and_then(|i| i.priority),
            source: last.as_ref().and_then(|i| i.source.clone()),
            count: Some(count),
            batch: true,
            payload: None,
        });
        Ok(events)
    }

    /// Delete, spec §4.3: tombstone `id`, rebuild every topic's ring
    /// excluding it, emit `del`.
    pub fn delete(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.tombstones.insert(id.to_string());
        for ring in inner.topics.values_mut() {
            ring.retain_excluding_id(id);
        }
        inner.revision = inner.revision.saturating_add(1);
        let rev = inner.revision;
        drop(inner);

        self.hub.emit(ChangeEvent {
            bus: self.name,
            op: ChangeOp::Del,
            rev,
            id: Some(id.to_string()),
            priority: None,
            source: None,
            count: None,
            batch: false,
            payload: None,
        });
    }

    pub fn get_recent(&self, topic: &str, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        inner.topics.get(topic).map(|r| r.tail(limit)).unwrap_or_default()
    }

    /// Scan across all topics (or one), filter `seq > after_seq`, sort
    /// ascending, take first `limit`.
    pub fn get_since(&self, topic: Option<&str>, after_seq: u64, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut out: Vec<Event> = match topic {
            Some(t) => inner
                .topics
                .get(t)
                .map(|r| r.iter().filter(|e| e.seq > after_seq).cloned().collect())
                .unwrap_or_default(),
            None => inner
                .topics
                .values()
                .flat_map(|r| r.iter().filter(|e| e.seq > after_seq).cloned())
                .collect(),
        };
        out.sort_by_key(|e| e.seq);
        out.truncate(limit);
        out
    }

    pub fn query(&self, filter: &QueryFilter) -> Vec<Event> {
        let inner = self.inner.lock();
        let candidates: Box<dyn Iterator<Item = &Event> + '_> = match &filter.topic {
            Some(t) => Box::new(inner.topics.get(t.as_str()).into_iter().flat_map(|r| r.iter())),
            None => Box::new(inner.topics.values().flat_map(|r| r.iter())),
        };
        let mut out: Vec<Event> = candidates.filter(|e| filter.matches(e)).cloned().collect();
        out.sort_by(|a, b| b.seq.cmp(&a.seq));
        out.truncate(filter.limit);
        out
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.inner.lock().topics.keys().cloned().collect()
    }

    pub fn topic_meta(&self, topic: &str) -> Option<TopicMeta> {
        self.inner.lock().meta.get(topic).cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub topic: Option<String>,
    pub plugin_id: Option<String>,
    pub source: Option<String>,
    pub kind: Option<String>,
    pub r#type: Option<String>,
    pub priority_min: Option<i64>,
    pub since_ts: Option<i64>,
    pub until_ts: Option<i64>,
    pub limit: usize,
}

impl QueryFilter {
    pub fn matches(&self, e: &Event) -> bool {
        if let Some(v) = &self.plugin_id {
            if v != "*" && e.index.plugin_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.source {
            if e.index.source.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.kind {
            if e.index.kind.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.r#type {
            if e.index.r#type.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.priority_min {
            if e.index.priority.unwrap_or(i64::MIN) < min {
                return false;
            }
        }
        if let Some(since) = self.since_ts {
            if e.ts < since {
                return false;
            }
        }
        if let Some(until) = self.until_ts {
            if e.ts > until {
                return false;
            }
        }
        true
    }
}

pub fn light(events: &[Event]) -> Vec<LightEvent> {
    events.iter().map(LightEvent::from).collect()
}
