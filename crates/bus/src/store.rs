// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-topic ring buffer and metadata (spec §3 `TopicStore`).

use std::collections::VecDeque;

use crate::event::Event;

#[derive(Debug, Clone)]
pub struct TopicMeta {
    pub created_at: i64,
    pub last_ts: i64,
    pub count_total: u64,
}

/// A single topic's bounded, append-only ring. Oldest events are evicted
/// first once `maxlen` is reached (spec §3 "at most `maxlen` events, oldest
/// evicted first").
#[derive(Debug, Default)]
pub struct TopicRing {
    items: VecDeque<Event>,
}

impl TopicRing {
    pub fn push(&mut self, event: Event, maxlen: usize) {
        self.items.push_back(event);
        while self.items.len() > maxlen {
            self.items.pop_front();
        }
    }

    pub fn retain_excluding_id(&mut self, id: &str) {
        self.items.retain(|e| e.index.id.as_deref() != Some(id));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.items.iter()
    }

    pub fn tail(&self, limit: usize) -> Vec<Event> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
