// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `memory` bus backs `USER_CONTEXT_GET`/`MEMORY_QUERY` (spec §6) with a
//! bounded per-bucket history with TTL, distinct from the other five buses'
//! unbounded-until-ring-eviction semantics: entries additionally expire by
//! wall clock regardless of ring pressure.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: u64,
}

pub struct MemoryStore {
    max_per_bucket: usize,
    buckets: Mutex<HashMap<String, Vec<Entry>>>,
}

impl MemoryStore {
    pub fn new(max_per_bucket: usize) -> Self {
        Self { max_per_bucket, buckets: Mutex::new(HashMap::new()) }
    }

    pub fn put(&self, bucket: &str, value: Value, now_ms: u64, ttl_ms: u64) {
        let mut buckets = self.buckets.lock();
        let entries = buckets.entry(bucket.to_string()).or_default();
        entries.retain(|e| e.expires_at_ms > now_ms);
        entries.push(Entry { value, expires_at_ms: now_ms + ttl_ms });
        if entries.len() > self.max_per_bucket {
            let overflow = entries.len() - self.max_per_bucket;
            entries.drain(0..overflow);
        }
    }

    /// Bounded per-bucket history, already TTL-filtered as of `now_ms`.
    pub fn get(&self, bucket: &str, now_ms: u64) -> Vec<Value> {
        let mut buckets = self.buckets.lock();
        let entries = buckets.entry(bucket.to_string()).or_default();
        entries.retain(|e| e.expires_at_ms > now_ms);
        entries.iter().map(|e| e.value.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_excluded_from_get() {
        let store = MemoryStore::new(10);
        store.put("b1", serde_json::json!("v1"), 0, 100);
        assert_eq!(store.get("b1", 50).len(), 1);
        assert_eq!(store.get("b1", 200).len(), 0);
    }

    #[test]
    fn bucket_is_bounded_to_max_per_bucket() {
        let store = MemoryStore::new(2);
        for i in 0..5 {
            store.put("b1", serde_json::json!(i), 0, 10_000);
        }
        assert_eq!(store.get("b1", 0).len(), 2);
    }
}
